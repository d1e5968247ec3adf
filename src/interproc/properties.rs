//! Nullness properties stored in the databases and the combinators that merge them.

use super::DatabaseProperty;
use super::propagation::PropertyCombinator;
use crate::dataflow::null_set::NullnessValue;

fn encode_nullness(value: NullnessValue) -> String {
    value.to_string()
}

fn decode_nullness(text: &str) -> Result<NullnessValue, String> {
    match text {
        "null" => Ok(NullnessValue::DefinitelyNull),
        "nonnull" => Ok(NullnessValue::DefinitelyNotNull),
        "unknown" => Ok(NullnessValue::Unknown),
        other => Err(format!("unknown nullness {other:?}")),
    }
}

/// Nullness of every value a method can return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ReturnNullness(pub(crate) NullnessValue);

impl ReturnNullness {
    pub(crate) fn is_non_null(self) -> bool {
        self.0 == NullnessValue::DefinitelyNotNull
    }
}

impl DatabaseProperty for ReturnNullness {
    fn encode(&self) -> String {
        encode_nullness(self.0)
    }

    fn decode(text: &str) -> Result<Self, String> {
        decode_nullness(text).map(Self)
    }
}

/// Nullness of every value stored into a field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FieldNullness(pub(crate) NullnessValue);

impl DatabaseProperty for FieldNullness {
    fn encode(&self) -> String {
        encode_nullness(self.0)
    }

    fn decode(text: &str) -> Result<Self, String> {
        decode_nullness(text).map(Self)
    }
}

/// Parameters, by declaration index, that must never receive null.
///
/// Stored as a decimal bit mask; bit `i` is parameter `i`, receiver excluded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct ParameterNullness {
    non_null: u64,
}

impl ParameterNullness {
    pub(crate) const MAX_PARAMETERS: usize = 64;

    pub(crate) fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut property = Self::default();
        for index in indices {
            property.set_non_null(index);
        }
        property
    }

    /// Out-of-range indices are ignored.
    pub(crate) fn set_non_null(&mut self, index: usize) {
        if index < Self::MAX_PARAMETERS {
            self.non_null |= 1 << index;
        }
    }

    pub(crate) fn is_non_null(&self, index: usize) -> bool {
        index < Self::MAX_PARAMETERS && self.non_null & (1 << index) != 0
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.non_null == 0
    }

    pub(crate) fn union(self, other: Self) -> Self {
        Self {
            non_null: self.non_null | other.non_null,
        }
    }
}

impl DatabaseProperty for ParameterNullness {
    fn encode(&self) -> String {
        self.non_null.to_string()
    }

    fn decode(text: &str) -> Result<Self, String> {
        text.parse::<u64>()
            .map(|non_null| Self { non_null })
            .map_err(|err| format!("invalid parameter mask {text:?}: {err}"))
    }
}

/// Keeps a definite return nullness only when source and target agree.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MergeReturnNullness;

impl PropertyCombinator<ReturnNullness> for MergeReturnNullness {
    fn combine(&self, source: &ReturnNullness, target: &ReturnNullness) -> ReturnNullness {
        ReturnNullness(source.0.merge(target.0))
    }

    /// An overridden method without an entry stays unknown; other overriders may be unanalysed.
    fn seed(&self, _source: &ReturnNullness) -> Option<ReturnNullness> {
        None
    }
}

/// A target inherits every non-null parameter of its source.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct InheritNonNullParameters;

impl PropertyCombinator<ParameterNullness> for InheritNonNullParameters {
    fn combine(&self, source: &ParameterNullness, target: &ParameterNullness) -> ParameterNullness {
        source.union(*target)
    }

    fn seed(&self, source: &ParameterNullness) -> Option<ParameterNullness> {
        Some(*source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullness_codec() {
        for value in [
            NullnessValue::DefinitelyNull,
            NullnessValue::DefinitelyNotNull,
            NullnessValue::Unknown,
        ] {
            let property = ReturnNullness(value);
            assert_eq!(ReturnNullness::decode(&property.encode()), Ok(property));
        }
        assert!(FieldNullness::decode("NONNULL").is_err());
    }

    #[test]
    fn parameter_mask_codec() {
        let property = ParameterNullness::from_indices([0, 2]);
        assert_eq!(property.encode(), "5");
        assert_eq!(ParameterNullness::decode("5"), Ok(property));
        assert!(property.is_non_null(2));
        assert!(!property.is_non_null(1));
        assert!(!property.is_non_null(200));
        assert!(ParameterNullness::decode("-1").is_err());
    }

    #[test]
    fn combinators() {
        let non_null = ReturnNullness(NullnessValue::DefinitelyNotNull);
        let null = ReturnNullness(NullnessValue::DefinitelyNull);
        assert_eq!(MergeReturnNullness.combine(&non_null, &non_null), non_null);
        assert_eq!(
            MergeReturnNullness.combine(&non_null, &null),
            ReturnNullness(NullnessValue::Unknown)
        );

        let combined = InheritNonNullParameters.combine(
            &ParameterNullness::from_indices([0]),
            &ParameterNullness::from_indices([1]),
        );
        assert_eq!(combined, ParameterNullness::from_indices([0, 1]));
    }
}
