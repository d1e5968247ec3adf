//! Value numbers supplied by the value-numbering stage.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::ValueNumberError;
use crate::ir::{BlockId, Location};

/// Largest value-number count a method may declare; facts hold two bits per value.
pub(crate) const MAX_VALUE_NUMBERS: u32 = 1 << 20;

/// Abstract identity of a runtime value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
#[serde(transparent)]
pub(crate) struct ValueNumber(pub(crate) u32);

impl ValueNumber {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Value numbers held by each local and stack slot at one program point.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub(crate) struct ValueNumberFrame {
    #[serde(default = "frame_is_valid")]
    pub(crate) valid: bool,
    #[serde(default)]
    pub(crate) locals: Vec<ValueNumber>,
    #[serde(default)]
    pub(crate) stack: Vec<ValueNumber>,
}

fn frame_is_valid() -> bool {
    true
}

impl ValueNumberFrame {
    /// Stack slot `depth` positions below the top; `0` is the top.
    pub(crate) fn stack_value(&self, depth: usize) -> Option<ValueNumber> {
        let len = self.stack.len();
        if depth >= len {
            return None;
        }
        self.stack.get(len - 1 - depth).copied()
    }

    pub(crate) fn top_value(&self) -> Option<ValueNumber> {
        self.stack_value(0)
    }

    pub(crate) fn local(&self, slot: usize) -> Option<ValueNumber> {
        self.locals.get(slot).copied()
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawLocationFrames {
    block: BlockId,
    index: usize,
    before: ValueNumberFrame,
    after: ValueNumberFrame,
}

#[derive(Clone, Debug, Deserialize)]
struct RawValueNumberFacts {
    num_values: u32,
    #[serde(default)]
    frames: Vec<RawLocationFrames>,
}

/// Frames before and after every instruction of one method.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(try_from = "RawValueNumberFacts")]
pub(crate) struct ValueNumberFacts {
    num_values: u32,
    frames: BTreeMap<Location, (ValueNumberFrame, ValueNumberFrame)>,
}

impl TryFrom<RawValueNumberFacts> for ValueNumberFacts {
    type Error = ValueNumberError;

    fn try_from(raw: RawValueNumberFacts) -> Result<Self, Self::Error> {
        if raw.num_values > MAX_VALUE_NUMBERS {
            return Err(ValueNumberError::TooManyValues {
                found: raw.num_values,
                limit: MAX_VALUE_NUMBERS,
            });
        }
        let frames = raw
            .frames
            .into_iter()
            .map(|frame| {
                (
                    Location {
                        block: frame.block,
                        index: frame.index,
                    },
                    (frame.before, frame.after),
                )
            })
            .collect();
        Ok(Self {
            num_values: raw.num_values,
            frames,
        })
    }
}

impl ValueNumberFacts {
    /// Number of distinct value numbers allocated for the method.
    pub(crate) fn num_values(&self) -> usize {
        self.num_values as usize
    }

    pub(crate) fn frame_before(&self, location: Location) -> Option<&ValueNumberFrame> {
        self.frames.get(&location).map(|(before, _)| before)
    }

    pub(crate) fn frame_after(&self, location: Location) -> Option<&ValueNumberFrame> {
        self.frames.get(&location).map(|(_, after)| after)
    }

    #[cfg(test)]
    pub(crate) fn from_frames(
        num_values: u32,
        frames: Vec<(Location, ValueNumberFrame, ValueNumberFrame)>,
    ) -> Self {
        Self {
            num_values,
            frames: frames
                .into_iter()
                .map(|(location, before, after)| (location, (before, after)))
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) fn frame(locals: &[u32], stack: &[u32]) -> ValueNumberFrame {
    ValueNumberFrame {
        valid: true,
        locals: locals.iter().copied().map(ValueNumber).collect(),
        stack: stack.iter().copied().map(ValueNumber).collect(),
    }
}
