//! Error types for fixq.
//!
//! Construction-time misuse is the only fault. Contention outcomes (full,
//! empty, disabled) are ordinary values returned by the reservation calls.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FixqError>;

#[derive(Error, Debug)]
pub enum FixqError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl FixqError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }
}

/// Why a push reservation was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("queue is full")]
    Full,
    #[error("queue is disabled")]
    Disabled,
}

/// Returned by `FixedQueue::try_push_back`, handing the value back.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    #[error("queue is full")]
    Full(T),
    #[error("queue is disabled")]
    Disabled(T),
}

impl<T> TryPushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Disabled(value) => value,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled(_))
    }
}

/// Returned by the blocking `FixedQueue::push_back`, which only gives up on a
/// disabled queue.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PushBackError<T> {
    #[error("queue is disabled")]
    Disabled(T),
}

impl<T> PushBackError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Disabled(value) => value,
        }
    }
}
