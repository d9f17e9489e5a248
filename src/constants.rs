//! Bit layout and tuning constants.
//!
//! Every shared word is a `u32`. A slot-state word spends its two low bits on
//! the element state, so a generation has 30 bits. The push word spends its top
//! bit on the disabled flag, so a combined index has 31 bits.

/// Bits used for the element state in a slot-state word
pub const NUM_ELEMENT_STATE_BITS: u32 = 2;

/// Mask selecting the element state from a slot-state word
pub const ELEMENT_STATE_MASK: u32 = (1 << NUM_ELEMENT_STATE_BITS) - 1;

/// Shift applied to the generation inside a slot-state word
pub const GENERATION_SHIFT: u32 = NUM_ELEMENT_STATE_BITS;

/// Disabled flag in the push word
pub const DISABLED_FLAG: u32 = 1 << (u32::BITS - 1);

/// Number of distinct generations a slot-state word can hold (2^30)
pub const MAX_ELEMENT_GENERATIONS: u32 = 1 << (u32::BITS - NUM_ELEMENT_STATE_BITS);

/// Number of distinct combined indices a push word can hold (2^31)
pub const MAX_COMBINED_INDICES: u32 = DISABLED_FLAG;

/// Largest supported capacity: at least two generations must fit in a
/// combined index.
pub const MAX_CAPACITY: u32 = MAX_COMBINED_INDICES / 2;

/// Default capacity for `QueueConfig`
pub const DEFAULT_QUEUE_CAPACITY: u32 = 1024;

/// Non-blocking attempts `push_back`/`pop_front` make before parking
pub const DEFAULT_SPIN_LIMIT: u32 = 64;

static_assertions::const_assert_eq!(MAX_CAPACITY, 1 << 30);
static_assertions::const_assert!(MAX_ELEMENT_GENERATIONS >= 2);
static_assertions::const_assert!(DEFAULT_QUEUE_CAPACITY <= MAX_CAPACITY);
