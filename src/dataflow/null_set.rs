use std::fmt;

use fixedbitset::FixedBitSet;

use crate::vna::ValueNumber;

const TOP_BIT: usize = 0;
const BOTTOM_BIT: usize = 1;
const FIRST_VALUE_BIT: usize = 2;

/// What is known about one value's nullness at a program point.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum NullnessValue {
    DefinitelyNull,
    DefinitelyNotNull,
    Unknown,
}

impl NullnessValue {
    /// Keeps a definite status only when both sides agree.
    pub(crate) fn merge(self, other: Self) -> Self {
        if self == other { self } else { Self::Unknown }
    }

    pub(crate) fn is_definite(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for NullnessValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::DefinitelyNull => "null",
            Self::DefinitelyNotNull => "nonnull",
            Self::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Per-value null definiteness, packed two bits per value number.
///
/// Bit 0 flags Top (unreached), bit 1 flags Bottom (conflict). Value `n` owns
/// bit `2 + 2n` (definitely null) and bit `2 + 2n + 1` (definitely not null);
/// both clear means unknown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct DefinitelyNullSet {
    contents: FixedBitSet,
    num_values: usize,
}

impl DefinitelyNullSet {
    /// A Top set sized for `num_values` value numbers.
    pub(crate) fn new(num_values: usize) -> Self {
        let mut contents = FixedBitSet::with_capacity(FIRST_VALUE_BIT + 2 * num_values);
        contents.insert(TOP_BIT);
        Self {
            contents,
            num_values,
        }
    }

    pub(crate) fn is_top(&self) -> bool {
        self.contents.contains(TOP_BIT)
    }

    pub(crate) fn is_bottom(&self) -> bool {
        self.contents.contains(BOTTOM_BIT)
    }

    /// Neither Top nor Bottom.
    pub(crate) fn is_valid(&self) -> bool {
        !self.is_top() && !self.is_bottom()
    }

    pub(crate) fn set_top(&mut self) {
        self.contents.clear();
        self.contents.insert(TOP_BIT);
    }

    #[cfg(test)]
    pub(crate) fn set_bottom(&mut self) {
        self.contents.clear();
        self.contents.insert(BOTTOM_BIT);
    }

    /// Valid state with every value unknown.
    pub(crate) fn clear(&mut self) {
        self.contents.clear();
    }

    /// No value is both definitely null and definitely not null.
    pub(crate) fn is_consistent(&self) -> bool {
        (0..self.num_values).all(|index| {
            !(self.contents.contains(null_bit(index)) && self.contents.contains(non_null_bit(index)))
        })
    }

    pub(crate) fn nullness(&self, value: ValueNumber) -> NullnessValue {
        let index = value.index();
        if !self.is_valid() || index >= self.num_values {
            return NullnessValue::Unknown;
        }
        if self.contents.contains(null_bit(index)) {
            NullnessValue::DefinitelyNull
        } else if self.contents.contains(non_null_bit(index)) {
            NullnessValue::DefinitelyNotNull
        } else {
            NullnessValue::Unknown
        }
    }

    /// Ignored on Top and Bottom sets and for out-of-range values.
    pub(crate) fn set_nullness(&mut self, value: ValueNumber, nullness: NullnessValue) {
        let index = value.index();
        if !self.is_valid() || index >= self.num_values {
            return;
        }
        let (null, non_null) = match nullness {
            NullnessValue::DefinitelyNull => (true, false),
            NullnessValue::DefinitelyNotNull => (false, true),
            NullnessValue::Unknown => (false, false),
        };
        self.contents.set(null_bit(index), null);
        self.contents.set(non_null_bit(index), non_null);
    }

    /// Meet `other` into `self`: Top is the identity, Bottom absorbs, otherwise
    /// only facts both sides agree on survive.
    pub(crate) fn meet_into(&mut self, other: &Self) {
        if other.is_top() || self.is_bottom() {
            return;
        }
        if self.is_top() || other.is_bottom() {
            self.contents.clone_from(&other.contents);
            self.num_values = other.num_values;
            return;
        }
        self.contents.intersect_with(&other.contents);
    }

    /// Values with a definite status, in value-number order.
    pub(crate) fn definite_values(&self) -> impl Iterator<Item = (ValueNumber, NullnessValue)> + '_ {
        (0..self.num_values).filter_map(|index| {
            let value = ValueNumber(index as u32);
            let nullness = self.nullness(value);
            nullness.is_definite().then_some((value, nullness))
        })
    }
}

fn null_bit(index: usize) -> usize {
    FIRST_VALUE_BIT + 2 * index
}

fn non_null_bit(index: usize) -> usize {
    FIRST_VALUE_BIT + 2 * index + 1
}

impl fmt::Display for DefinitelyNullSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_top() {
            return f.write_str("[TOP]");
        }
        if self.is_bottom() {
            return f.write_str("[BOTTOM]");
        }
        f.write_str("{")?;
        for (position, (value, nullness)) in self.definite_values().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", value.0, nullness)?;
        }
        f.write_str("}")
    }
}
