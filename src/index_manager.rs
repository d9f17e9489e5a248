//! Lock-free index manager for a fixed-capacity circular buffer.
//!
//! Hands out slot indices to producers and consumers of an externally owned
//! buffer. Every slot has one atomic state word `(generation << 2) | state`,
//! and the only synchronization point is a CAS on that word:
//!
//! ```text
//!   (g, EMPTY) --reserve_push--> (g, WRITING) --commit_push--> (g, FULL)
//!       ^                                                          |
//!       |                                                     reserve_pop
//!       |                                                          v
//!   (g+1, EMPTY) <-------------commit_pop------------------ (g, READING)
//! ```
//!
//! The push and pop words hold a combined index `generation * capacity +
//! index`. They are only hints: a stale value is detected by comparing the
//! expected generation with the one found in the slot, and threads help each
//! other advance them. Bumping the generation on every `commit_pop` is what
//! defeats ABA: a producer holding a stale combined index can never win the
//! CAS on a slot that has been recycled.
//!
//! Memory ordering:
//! - `commit_push_index` (Release) -> successful pop CAS (Acquire): payload
//!   written by the producer is visible to the consumer.
//! - `commit_pop_index` (Release) -> successful push CAS (Acquire): the
//!   consumer has finished reading before the slot is overwritten.

use std::fmt;

use crossbeam::utils::CachePadded;

use crate::constants::{DISABLED_FLAG, MAX_CAPACITY};
use crate::encoding::{
    circular_difference,
    decode_generation,
    decode_state,
    discard_disabled_flag,
    encode_state,
    is_disabled,
    num_representable_generations,
    ElementState,
};
use crate::error::{FixqError, PushError, Result};
use crate::fixq_debug;
use crate::insights;
use crate::sync::{yield_now, AtomicU32, Ordering};

/// A slot handed out by the index manager.
///
/// The holder has exclusive access to `index` in the external buffer until
/// it commits (or aborts) the reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reservation {
    pub generation: u32,
    pub index: u32,
}

impl Reservation {
    pub const fn new(generation: u32, index: u32) -> Self {
        Self { generation, index }
    }

    /// Position in the external buffer
    #[inline]
    pub const fn slot(&self) -> usize {
        self.index as usize
    }
}

pub struct IndexManager {
    /// Combined push index; the top bit is the disabled flag
    push_index: CachePadded<AtomicU32>,
    /// Combined pop index
    pop_index: CachePadded<AtomicU32>,
    capacity: u32,
    max_generation: u32,
    max_combined_index: u32,
    states: Box<[AtomicU32]>,
}

impl IndexManager {
    /// Create a manager for a buffer of `capacity` slots, all empty at
    /// generation 0.
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(FixqError::config("Capacity must be greater than 0"));
        }
        if capacity > MAX_CAPACITY {
            return Err(
                FixqError::config(format!("Capacity {} exceeds maximum {}", capacity, MAX_CAPACITY))
            );
        }

        Ok(Self::with_generations(capacity, num_representable_generations(capacity)))
    }

    /// Requires `2 <= generations <= num_representable_generations(capacity)`.
    fn with_generations(capacity: u32, generations: u32) -> Self {
        debug_assert!(generations >= 2, "at least two generations required");
        let states = (0..capacity)
            .map(|_| AtomicU32::new(encode_state(0, ElementState::Empty)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        fixq_debug!(capacity, max_generation = generations - 1, "index manager created");

        Self {
            push_index: CachePadded::new(AtomicU32::new(0)),
            pop_index: CachePadded::new(AtomicU32::new(0)),
            capacity,
            max_generation: generations - 1,
            max_combined_index: generations * capacity - 1,
            states,
        }
    }

    // PRODUCER API

    /// Reserve the next slot for writing.
    ///
    /// Fails with `PushError::Full` when the slot at the push index still
    /// belongs to the previous generation, and with `PushError::Disabled`
    /// after `disable()`.
    pub fn reserve_push_index(&self) -> std::result::Result<Reservation, PushError> {
        let mut loaded = self.push_index.load(Ordering::Relaxed);
        // Push word seen by the previous "looks full" probe
        let mut saved: Option<u32> = None;

        loop {
            if is_disabled(loaded) {
                insights::record_disabled_push();
                return Err(PushError::Disabled);
            }

            let combined = loaded;
            let (generation, index) = self.split(combined);

            let result = self.states[index as usize].compare_exchange(
                encode_state(generation, ElementState::Empty),
                encode_state(generation, ElementState::Writing),
                Ordering::Acquire,
                Ordering::Relaxed
            );

            let found = match result {
                Ok(_) => {
                    // Losing this race just means someone else advanced it.
                    let _ = self.push_index.compare_exchange(
                        combined,
                        self.next_combined_index(combined),
                        Ordering::Relaxed,
                        Ordering::Relaxed
                    );
                    return Ok(Reservation::new(generation, index));
                }
                Err(found) => found,
            };

            // A previous-generation slot is never EMPTY; with two generations an
            // EMPTY slot there is one ahead of a lagging push word.
            let found_state = decode_state(found);
            if found_state != ElementState::Empty &&
                self.is_previous_generation(generation, decode_generation(found))
            {
                if found_state == ElementState::Reading {
                    // A consumer is about to recycle this slot.
                    yield_now();
                    loaded = self.push_index.load(Ordering::Relaxed);
                    continue;
                }

                // Full, unless the push word moved since the last probe. The
                // second look keeps a single-slot queue from reporting full
                // while a consumer is mid-flight.
                if saved == Some(loaded) {
                    insights::record_queue_full(self.capacity);
                    return Err(PushError::Full);
                }
                saved = Some(loaded);
                loaded = self.push_index.load(Ordering::Relaxed);
                continue;
            }

            // Another producer owns this slot, or our push word is stale.
            insights::record_contention(combined);
            loaded = self.advance(&self.push_index, combined);
        }
    }

    /// Mark a reserved slot as holding a value.
    pub fn commit_push_index(&self, reservation: Reservation) {
        let Reservation { generation, index } = reservation;
        self.debug_check_reservation(reservation);
        debug_assert_eq!(
            self.states[index as usize].load(Ordering::Relaxed),
            encode_state(generation, ElementState::Writing),
            "commit_push_index on a slot not reserved for writing"
        );

        self.states[index as usize].store(
            encode_state(generation, ElementState::Full),
            Ordering::Release
        );
    }

    /// Give back the most recent push reservation without a value.
    ///
    /// Only valid while the pop index points at `reservation`, i.e. every
    /// slot before it has been popped or cleared. The slot goes through the
    /// same READING -> EMPTY(g+1) path a consumer would take.
    pub fn abort_push_index_reservation(&self, reservation: Reservation) {
        let Reservation { generation, index } = reservation;
        self.debug_check_reservation(reservation);
        let combined = self.combine(generation, index);
        debug_assert_eq!(
            self.states[index as usize].load(Ordering::Relaxed),
            encode_state(generation, ElementState::Writing),
            "abort_push_index_reservation on a slot not reserved for writing"
        );
        debug_assert_eq!(
            self.pop_index.load(Ordering::Relaxed),
            combined,
            "abort_push_index_reservation requires the pop index at the reservation"
        );

        let slot = &self.states[index as usize];
        slot.store(encode_state(generation, ElementState::Reading), Ordering::Relaxed);
        let _ = self.pop_index.compare_exchange(
            combined,
            self.next_combined_index(combined),
            Ordering::Relaxed,
            Ordering::Relaxed
        );
        slot.store(
            encode_state(self.next_generation(generation), ElementState::Empty),
            Ordering::Release
        );
    }

    // CONSUMER API

    /// Reserve the oldest full slot for reading, or `None` if the queue is
    /// empty.
    ///
    /// A slot that a producer is still writing is waited on (yield + retry),
    /// so values are handed out in push order.
    pub fn reserve_pop_index(&self) -> Option<Reservation> {
        let mut loaded = self.pop_index.load(Ordering::Relaxed);
        let mut saved: Option<u32> = None;

        loop {
            let combined = loaded;
            let (generation, index) = self.split(combined);

            let result = self.states[index as usize].compare_exchange(
                encode_state(generation, ElementState::Full),
                encode_state(generation, ElementState::Reading),
                Ordering::Acquire,
                Ordering::Relaxed
            );

            let found = match result {
                Ok(_) => {
                    let _ = self.pop_index.compare_exchange(
                        combined,
                        self.next_combined_index(combined),
                        Ordering::Relaxed,
                        Ordering::Relaxed
                    );
                    return Some(Reservation::new(generation, index));
                }
                Err(found) => found,
            };

            let found_generation = decode_generation(found);
            let found_state = decode_state(found);

            // A previous-generation slot at the pop position is always READING.
            // With two generations anything else is one ahead of a stale pop
            // word, and so is a READING slot once the pop word has moved on.
            if found_state == ElementState::Reading &&
                self.is_previous_generation(generation, found_generation)
            {
                if self.max_generation == 1 {
                    let current = self.pop_index.load(Ordering::Relaxed);
                    if current != combined {
                        loaded = current;
                        continue;
                    }
                }
                // Last cycle's value is still being read; nothing new here.
                insights::record_queue_empty(self.capacity);
                return None;
            }

            if found_generation == generation {
                match found_state {
                    ElementState::Empty => {
                        if saved == Some(loaded) {
                            insights::record_queue_empty(self.capacity);
                            return None;
                        }
                        saved = Some(loaded);
                        loaded = self.pop_index.load(Ordering::Relaxed);
                        continue;
                    }
                    ElementState::Writing => {
                        yield_now();
                        loaded = self.pop_index.load(Ordering::Relaxed);
                        continue;
                    }
                    ElementState::Full | ElementState::Reading => {}
                }
            }

            // Another consumer took this slot, or our pop word is stale.
            insights::record_contention(combined);
            loaded = self.advance(&self.pop_index, combined);
        }
    }

    /// Release a slot after reading; it becomes writable for the next
    /// generation.
    pub fn commit_pop_index(&self, reservation: Reservation) {
        let Reservation { generation, index } = reservation;
        self.debug_check_reservation(reservation);
        debug_assert_eq!(
            self.states[index as usize].load(Ordering::Relaxed),
            encode_state(generation, ElementState::Reading),
            "commit_pop_index on a slot not reserved for reading"
        );

        self.states[index as usize].store(
            encode_state(self.next_generation(generation), ElementState::Empty),
            Ordering::Release
        );
    }

    // CLEAR API

    /// Reserve the next full slot strictly before `end` for disposal.
    ///
    /// `end` must be a push reservation held by the caller; it bounds the
    /// scan, so this never reports an empty queue. Returns `None` once the pop
    /// index reaches `end`. Each returned slot is finalized with
    /// `commit_pop_index`.
    pub fn reserve_pop_index_for_clear(&self, end: Reservation) -> Option<Reservation> {
        debug_assert!(end.generation <= self.max_generation, "end generation out of range");
        debug_assert!(end.index < self.capacity, "end index out of range");

        let end_combined = self.combine(end.generation, end.index);
        let mut loaded = self.pop_index.load(Ordering::Relaxed);

        loop {
            if loaded == end_combined {
                return None;
            }

            let combined = loaded;
            let (generation, index) = self.split(combined);

            let result = self.states[index as usize].compare_exchange(
                encode_state(generation, ElementState::Full),
                encode_state(generation, ElementState::Reading),
                Ordering::Acquire,
                Ordering::Relaxed
            );

            let found = match result {
                Ok(_) => {
                    let _ = self.pop_index.compare_exchange(
                        combined,
                        self.next_combined_index(combined),
                        Ordering::Relaxed,
                        Ordering::Relaxed
                    );
                    return Some(Reservation::new(generation, index));
                }
                Err(found) => found,
            };

            let found_generation = decode_generation(found);
            let taken = (found_generation == generation &&
                decode_state(found) == ElementState::Reading) ||
                found_generation == self.next_generation(generation);

            if taken {
                loaded = self.advance(&self.pop_index, combined);
            } else {
                // A producer ahead of `end` has not committed yet.
                yield_now();
                loaded = self.pop_index.load(Ordering::Relaxed);
            }
        }
    }

    // ENABLE / DISABLE

    /// Refuse new push reservations. In-flight reservations are unaffected.
    pub fn disable(&self) {
        let previous = self.push_index.fetch_or(DISABLED_FLAG, Ordering::AcqRel);
        if !is_disabled(previous) {
            fixq_debug!(capacity = self.capacity, "index manager disabled");
        }
    }

    /// Accept push reservations again.
    pub fn enable(&self) {
        let previous = self.push_index.fetch_and(!DISABLED_FLAG, Ordering::AcqRel);
        if is_disabled(previous) {
            fixq_debug!(capacity = self.capacity, "index manager enabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        !is_disabled(self.push_index.load(Ordering::Acquire))
    }

    // ACCESSORS

    /// Snapshot of the number of reserved-or-full slots.
    ///
    /// Loads the push index before the pop index without any lock, so the
    /// value may be stale by the time it returns. Always in `0..=capacity`.
    pub fn len(&self) -> u32 {
        let push = discard_disabled_flag(self.push_index.load(Ordering::Acquire));
        let pop = self.pop_index.load(Ordering::Acquire);
        let mut difference = circular_difference(push, pop, self.max_combined_index + 1);
        // With two generations a full queue sits exactly half way round.
        if self.max_generation == 1 && difference == -(self.capacity as i32) {
            difference = self.capacity as i32;
        }
        difference.clamp(0, self.capacity as i32) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn max_generation(&self) -> u32 {
        self.max_generation
    }

    pub fn max_combined_index(&self) -> u32 {
        self.max_combined_index
    }

    #[inline]
    pub fn next_combined_index(&self, combined: u32) -> u32 {
        if combined == self.max_combined_index { 0 } else { combined + 1 }
    }

    #[inline]
    pub fn next_generation(&self, generation: u32) -> u32 {
        if generation == self.max_generation { 0 } else { generation + 1 }
    }

    // INTERNALS

    #[inline]
    fn split(&self, combined: u32) -> (u32, u32) {
        (combined / self.capacity, combined % self.capacity)
    }

    #[inline]
    fn combine(&self, generation: u32, index: u32) -> u32 {
        generation * self.capacity + index
    }

    /// `true` when `found` is exactly one generation behind `expected`.
    ///
    /// With only two representable generations "one behind" and "one ahead"
    /// coincide; a stale read is then caught by the second probe.
    #[inline]
    fn is_previous_generation(&self, expected: u32, found: u32) -> bool {
        let difference = circular_difference(expected, found, self.max_generation + 1);
        difference == 1 || (difference == -1 && self.max_generation == 1)
    }

    /// Move `word` from `combined` to the next combined index; returns the
    /// value to retry with.
    #[inline]
    fn advance(&self, word: &AtomicU32, combined: u32) -> u32 {
        let next = self.next_combined_index(combined);
        match word.compare_exchange(combined, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => next,
            Err(actual) => actual,
        }
    }

    #[inline]
    fn debug_check_reservation(&self, reservation: Reservation) {
        debug_assert!(reservation.generation <= self.max_generation, "generation out of range");
        debug_assert!(reservation.index < self.capacity, "index out of range");
    }
}

impl fmt::Display for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let push_word = self.push_index.load(Ordering::Relaxed);
        let (push_generation, push_slot) = self.split(discard_disabled_flag(push_word));
        let (pop_generation, pop_slot) = self.split(self.pop_index.load(Ordering::Relaxed));

        writeln!(f)?;
        writeln!(f, "{:>16}: {}", "capacity", self.capacity)?;
        writeln!(f, "{:>16}: {}", "enabled", u8::from(!is_disabled(push_word)))?;
        writeln!(f, "{:>16}: {}", "maxGeneration", self.max_generation)?;
        writeln!(f, "{:>16}: {}", "maxCombinedIndex", self.max_combined_index)?;
        writeln!(f, "{:>16}: {}", "pushGeneration", push_generation)?;
        writeln!(f, "{:>16}: {}", "pushIndex", push_slot)?;
        writeln!(f, "{:>16}: {}", "popGeneration", pop_generation)?;
        writeln!(f, "{:>16}: {}", "popIndex", pop_slot)?;

        for (i, state) in self.states.iter().enumerate() {
            let word = state.load(Ordering::Relaxed);
            write!(f, "{:>8}: {{ {:<3} | {:<7} }}", i, decode_generation(word), decode_state(word))?;
            let i = i as u32;
            match (i == push_slot, i == pop_slot) {
                (true, true) => write!(f, " <-- push & pop")?,
                (true, false) => write!(f, " <-- push")?,
                (false, true) => write!(f, " <-- pop")?,
                (false, false) => {}
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexManager")
            .field("capacity", &self.capacity)
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .field("max_generation", &self.max_generation)
            .field("max_combined_index", &self.max_combined_index)
            .finish()
    }
}
