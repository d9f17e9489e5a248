//! Insights - Observability for fixq.
//!
//! Tracing hooks for the reservation protocol. Zero-cost when disabled.
//!
//! # Usage
//!
//! ```toml
//! fixq = { version = "0.1", features = ["tracing"] }
//! ```
//! ```rust,ignore
//! fixq::insights::init_logging();
//! ```
//!
//! Full/empty/disabled outcomes are normal control flow, so they only show up
//! as `trace` spans. Lifecycle changes (construction, disable, enable, clear)
//! are `debug` events.

/// Install a `tracing-subscriber` fmt subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
#[cfg(feature = "tracing")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init_logging() {}

/// Record a push refused because every slot is taken
#[cfg(feature = "tracing")]
#[inline]
pub fn record_queue_full(capacity: u32) {
    let _span = tracing::trace_span!("queue_full", capacity).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_queue_full(_capacity: u32) {}

/// Record a pop that found nothing to consume
#[cfg(feature = "tracing")]
#[inline]
pub fn record_queue_empty(capacity: u32) {
    let _span = tracing::trace_span!("queue_empty", capacity).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_queue_empty(_capacity: u32) {}

/// Record a push refused by a disabled queue
#[cfg(feature = "tracing")]
#[inline]
pub fn record_disabled_push() {
    let _span = tracing::trace_span!("disabled_push").entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_disabled_push() {}

/// Record a lost CAS race on a slot (another thread got there first)
#[cfg(feature = "tracing")]
#[inline]
pub fn record_contention(combined_index: u32) {
    let _span = tracing::trace_span!("contention", combined_index).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_contention(_combined_index: u32) {}

/// Emit a `debug` event (no-op when tracing disabled)
#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! fixq_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! fixq_debug {
    ($($arg:tt)*) => {};
}
