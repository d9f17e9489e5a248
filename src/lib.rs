//! fixq - Lock-free index management for fixed-capacity MPMC queues.
//!
//! `IndexManager` hands out slot indices into a caller-owned circular buffer
//! of any capacity (not just powers of 2). Per-slot generation counters keep
//! stale producers and consumers from touching recycled slots.
//! `FixedQueue<T>` wraps it with value storage and blocking push/pop.
//!
//! ```rust
//! use fixq::FixedQueue;
//!
//! let queue = FixedQueue::new(3).unwrap();
//! queue.try_push_back(1u32).unwrap();
//! queue.try_push_back(2u32).unwrap();
//! assert_eq!(queue.try_pop_front(), Some(1));
//! assert_eq!(queue.len(), 1);
//! ```
//!
//! Using the index manager directly with your own storage:
//!
//! ```rust
//! use fixq::{IndexManager, PushError};
//!
//! let manager = IndexManager::new(2).unwrap();
//! let slot = manager.reserve_push_index().unwrap();
//! // ... write buffer[slot.slot()] ...
//! manager.commit_push_index(slot);
//!
//! let slot = manager.reserve_pop_index().unwrap();
//! // ... read buffer[slot.slot()] ...
//! manager.commit_pop_index(slot);
//!
//! manager.disable();
//! assert_eq!(manager.reserve_push_index(), Err(PushError::Disabled));
//! ```

pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod fixed_queue;
pub mod index_manager;
pub mod insights;

mod sync;

pub use config::QueueConfig;
pub use encoding::{circular_difference, num_representable_generations, ElementState};
pub use error::{FixqError, PushBackError, PushError, Result, TryPushError};
pub use fixed_queue::FixedQueue;
pub use index_manager::{IndexManager, Reservation};
pub use insights::init_logging;
