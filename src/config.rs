//! Queue construction parameters.

use crate::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SPIN_LIMIT, MAX_CAPACITY};
use crate::error::{FixqError, Result};

/// Configuration for `FixedQueue`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of slots (need not be a power of 2)
    pub capacity: u32,
    /// Non-blocking attempts before a blocking call parks
    pub spin_limit: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }
}

impl QueueConfig {
    /// Create a new configuration with the specified capacity
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(FixqError::config("Capacity must be greater than 0"));
        }
        if capacity > MAX_CAPACITY {
            return Err(
                FixqError::config(format!("Capacity {} exceeds maximum {}", capacity, MAX_CAPACITY))
            );
        }

        Ok(Self {
            capacity,
            ..Default::default()
        })
    }

    /// Set the spin limit; 0 parks right after the first failed attempt
    pub fn with_spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }
}
