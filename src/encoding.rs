//! Packing of generation, element state and the disabled flag into `u32` words.
//!
//! All functions are pure; the index manager is the only caller that touches
//! shared memory.

use std::fmt;

use crate::constants::{
    DISABLED_FLAG,
    ELEMENT_STATE_MASK,
    GENERATION_SHIFT,
    MAX_COMBINED_INDICES,
    MAX_ELEMENT_GENERATIONS,
};

/// State of a single slot in the external buffer.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementState {
    /// Available for writing
    Empty = 0,
    /// Reserved by a producer
    Writing = 1,
    /// Holds a committed value
    Full = 2,
    /// Reserved by a consumer
    Reading = 3,
}

impl ElementState {
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & ELEMENT_STATE_MASK {
            0 => Self::Empty,
            1 => Self::Writing,
            2 => Self::Full,
            _ => Self::Reading,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Writing => "WRITING",
            Self::Full => "FULL",
            Self::Reading => "READING",
        }
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[inline]
pub const fn encode_state(generation: u32, state: ElementState) -> u32 {
    (generation << GENERATION_SHIFT) | (state as u32)
}

#[inline]
pub const fn decode_generation(word: u32) -> u32 {
    word >> GENERATION_SHIFT
}

#[inline]
pub const fn decode_state(word: u32) -> ElementState {
    ElementState::from_bits(word)
}

#[inline]
pub const fn is_disabled(push_word: u32) -> bool {
    push_word & DISABLED_FLAG != 0
}

#[inline]
pub const fn discard_disabled_flag(push_word: u32) -> u32 {
    push_word & !DISABLED_FLAG
}

/// Signed distance from `subtrahend` to `minuend` on a circle of `modulo`
/// points, choosing the shorter way round.
///
/// A distance of exactly half the circle keeps its sign, so
/// `circular_difference(0, 180, 360) == -180` and
/// `circular_difference(180, 0, 360) == 180`.
///
/// Requires `modulo <= 2^31`, `minuend < modulo` and `subtrahend < modulo`.
#[inline]
pub fn circular_difference(minuend: u32, subtrahend: u32, modulo: u32) -> i32 {
    debug_assert!(modulo <= MAX_COMBINED_INDICES, "modulo out of range");
    debug_assert!(minuend < modulo, "minuend out of range");
    debug_assert!(subtrahend < modulo, "subtrahend out of range");

    let modulo = i64::from(modulo);
    let half = modulo / 2;
    let mut difference = i64::from(minuend) - i64::from(subtrahend);
    if difference > half {
        difference -= modulo;
    } else if difference < -half {
        difference += modulo;
    }
    difference as i32
}

/// Number of whole generations of `capacity` slots that fit both in a 31-bit
/// combined index and in a 30-bit slot generation.
///
/// Requires `0 < capacity <= MAX_CAPACITY`.
#[inline]
pub fn num_representable_generations(capacity: u32) -> u32 {
    debug_assert!(capacity > 0, "capacity must be greater than 0");
    (MAX_COMBINED_INDICES / capacity).min(MAX_ELEMENT_GENERATIONS)
}
