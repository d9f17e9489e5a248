//! Bounded MPMC queue built on `IndexManager`.
//!
//! Values live in a fixed array of `MaybeUninit<T>` cells; the index manager
//! decides who may touch which cell. The non-blocking calls never take a lock.
//! `push_back`/`pop_front` spin for `spin_limit` attempts and then park on a
//! condition variable.
//!
//! Wake-ups: a waiter bumps its counter and reads the wake-up epoch under the
//! lock, then re-checks the queue without it. It parks only if the epoch is
//! unchanged. A notifier publishes its change, issues a `SeqCst` fence and only
//! takes the lock (to bump the epoch and signal) when the counter is non-zero.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::config::QueueConfig;
use crate::error::{PushBackError, PushError, Result, TryPushError};
use crate::fixq_debug;
use crate::index_manager::{IndexManager, Reservation};

pub struct FixedQueue<T> {
    manager: IndexManager,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    spin_limit: u32,
    /// Bumped by every notifier that found a registered waiter
    wakeups: Mutex<u64>,
    not_full: Condvar,
    not_empty: Condvar,
    waiting_pushers: AtomicUsize,
    waiting_poppers: AtomicUsize,
}

// Slot access is serialized by the index manager's reservations.
unsafe impl<T: Send> Send for FixedQueue<T> {}
unsafe impl<T: Send> Sync for FixedQueue<T> {}

impl<T> FixedQueue<T> {
    /// Create a queue holding at most `capacity` values
    pub fn new(capacity: u32) -> Result<Self> {
        Self::with_config(QueueConfig::new(capacity)?)
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        let manager = IndexManager::new(config.capacity)?;
        let slots = (0..config.capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            manager,
            slots,
            spin_limit: config.spin_limit,
            wakeups: Mutex::new(0),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            waiting_pushers: AtomicUsize::new(0),
            waiting_poppers: AtomicUsize::new(0),
        })
    }

    // PUSH

    /// Append `value` without blocking.
    pub fn try_push_back(&self, value: T) -> std::result::Result<(), TryPushError<T>> {
        self.push_raw(value)?;
        self.wake_popper();
        Ok(())
    }

    /// Append `value`, waiting while the queue is full.
    ///
    /// Gives the value back only if the queue is (or becomes) disabled.
    pub fn push_back(&self, value: T) -> std::result::Result<(), PushBackError<T>> {
        let mut value = value;

        for _ in 0..self.spin_limit {
            match self.try_push_back(value) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Disabled(v)) => return Err(PushBackError::Disabled(v)),
                Err(TryPushError::Full(v)) => value = v,
            }
            std::hint::spin_loop();
        }

        loop {
            let epoch = self.register(&self.waiting_pushers);
            let result = self.push_raw(value);
            if let Err(TryPushError::Full(_)) = result {
                self.park(&self.not_full, epoch);
            }
            self.waiting_pushers.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(()) => {
                    self.wake_popper();
                    return Ok(());
                }
                Err(TryPushError::Disabled(v)) => return Err(PushBackError::Disabled(v)),
                Err(TryPushError::Full(v)) => value = v,
            }
        }
    }

    // POP

    /// Remove the oldest value without blocking.
    pub fn try_pop_front(&self) -> Option<T> {
        let value = self.pop_raw()?;
        self.wake_pusher();
        Some(value)
    }

    /// Remove the oldest value, waiting while the queue is empty.
    ///
    /// Disabling the queue does not wake poppers; they keep waiting for
    /// values pushed by reservations already in flight or after `enable`.
    pub fn pop_front(&self) -> T {
        for _ in 0..self.spin_limit {
            if let Some(value) = self.try_pop_front() {
                return value;
            }
            std::hint::spin_loop();
        }

        loop {
            let epoch = self.register(&self.waiting_poppers);
            let popped = self.pop_raw();
            if popped.is_none() {
                self.park(&self.not_empty, epoch);
            }
            self.waiting_poppers.fetch_sub(1, Ordering::SeqCst);

            if let Some(value) = popped {
                self.wake_pusher();
                return value;
            }
        }
    }

    /// Drop every value currently in the queue; returns how many were dropped.
    ///
    /// Values pushed concurrently may or may not be removed. Works on a
    /// disabled queue too.
    pub fn remove_all(&self) -> usize {
        let mut removed = 0;

        // Take the next push slot as an end marker; pop one value whenever
        // the queue is full so a slot frees up.
        let end = loop {
            match self.manager.reserve_push_index() {
                Ok(end) => break Some(end),
                Err(PushError::Full) => {
                    match self.manager.reserve_pop_index() {
                        Some(reservation) => {
                            self.discard(reservation);
                            removed += 1;
                        }
                        None => std::hint::spin_loop(),
                    }
                }
                Err(PushError::Disabled) => break None,
            }
        };

        match end {
            Some(end) => {
                while let Some(reservation) = self.manager.reserve_pop_index_for_clear(end) {
                    self.discard(reservation);
                    removed += 1;
                }
                self.manager.abort_push_index_reservation(end);
            }
            None => {
                while let Some(reservation) = self.manager.reserve_pop_index() {
                    self.discard(reservation);
                    removed += 1;
                }
            }
        }

        fixq_debug!(removed, capacity = self.capacity(), "queue cleared");
        self.wake_all_pushers();
        removed
    }

    // ENABLE / DISABLE

    /// Refuse further pushes and release every blocked pusher with
    /// `PushBackError::Disabled`. Pops keep working.
    pub fn disable(&self) {
        self.manager.disable();
        self.wake_all_pushers();
    }

    pub fn enable(&self) {
        self.manager.enable();
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_enabled()
    }

    // ACCESSORS

    /// Snapshot of the number of values (including in-flight reservations)
    pub fn len(&self) -> usize {
        self.manager.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn num_waiting_pushers(&self) -> usize {
        self.waiting_pushers.load(Ordering::Relaxed)
    }

    pub fn num_waiting_poppers(&self) -> usize {
        self.waiting_poppers.load(Ordering::Relaxed)
    }

    // INTERNALS

    fn push_raw(&self, value: T) -> std::result::Result<(), TryPushError<T>> {
        let reservation = match self.manager.reserve_push_index() {
            Ok(reservation) => reservation,
            Err(PushError::Full) => return Err(TryPushError::Full(value)),
            Err(PushError::Disabled) => return Err(TryPushError::Disabled(value)),
        };

        // SAFETY: the reservation gives this thread exclusive access to the
        // slot, which holds no live value in the WRITING state.
        unsafe {
            (*self.slots[reservation.slot()].get()).write(value);
        }
        self.manager.commit_push_index(reservation);
        Ok(())
    }

    fn pop_raw(&self) -> Option<T> {
        let reservation = self.manager.reserve_pop_index()?;
        // SAFETY: a pop reservation is only granted on a FULL slot, whose
        // value was written before the producer's release commit.
        let value = unsafe { (*self.slots[reservation.slot()].get()).assume_init_read() };
        self.manager.commit_pop_index(reservation);
        Some(value)
    }

    fn discard(&self, reservation: Reservation) {
        // SAFETY: same as `pop_raw`.
        unsafe {
            (*self.slots[reservation.slot()].get()).assume_init_drop();
        }
        self.manager.commit_pop_index(reservation);
    }

    /// Count the caller as a waiter; returns the epoch to park against.
    fn register(&self, waiters: &AtomicUsize) -> u64 {
        let epoch = {
            let guard = self.wakeups.lock();
            waiters.fetch_add(1, Ordering::SeqCst);
            *guard
        };
        fence(Ordering::SeqCst);
        epoch
    }

    /// Sleep on `condvar` unless a notifier ran since `register`.
    fn park(&self, condvar: &Condvar, epoch: u64) {
        let mut guard = self.wakeups.lock();
        if *guard == epoch {
            condvar.wait(&mut guard);
        }
    }

    fn notify(&self, waiters: &AtomicUsize, condvar: &Condvar, all: bool) {
        fence(Ordering::SeqCst);
        if waiters.load(Ordering::SeqCst) > 0 {
            let mut guard = self.wakeups.lock();
            *guard = guard.wrapping_add(1);
            if all {
                condvar.notify_all();
            } else {
                condvar.notify_one();
            }
        }
    }

    fn wake_popper(&self) {
        self.notify(&self.waiting_poppers, &self.not_empty, false);
    }

    fn wake_pusher(&self) {
        self.notify(&self.waiting_pushers, &self.not_full, false);
    }

    fn wake_all_pushers(&self) {
        self.notify(&self.waiting_pushers, &self.not_full, true);
    }
}

impl<T> Drop for FixedQueue<T> {
    fn drop(&mut self) {
        while let Some(reservation) = self.manager.reserve_pop_index() {
            self.discard(reservation);
        }
    }
}

impl<T> fmt::Debug for FixedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("enabled", &self.is_enabled())
            .field("waiting_pushers", &self.num_waiting_pushers())
            .field("waiting_poppers", &self.num_waiting_poppers())
            .finish()
    }
}
