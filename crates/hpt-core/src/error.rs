//! Typed error definitions for the timing engines.
//!
//! Provides [`HptError`] for failures that callers can act on: every variant
//! carries the resource involved and, where relevant, the requested value and
//! the bounds it violated, so a caller can retry with a different core index
//! or interval. All variants implement `std::error::Error` via `thiserror`, so
//! they integrate with `anyhow::Result` at the binary edge.

use thiserror::Error;

/// Errors raised while constructing, opening, or configuring a timer.
#[derive(Debug, Error)]
pub enum HptError {
    /// The monotonic counter could not be queried or reported a frequency
    /// that is not strictly positive.
    #[error("performance counter unavailable (frequency {frequency})")]
    CounterUnavailable { frequency: i64 },

    /// Core 0 is reserved for the system and never handed to a spin-wait timer.
    #[error("core 0 is reserved and cannot be dedicated to a timer")]
    CoreIndexReserved,

    /// The requested core does not exist on this machine.
    #[error("core {requested} out of range (valid cores are 1..{processors})")]
    CoreIndexOutOfRange { requested: usize, processors: usize },

    /// A spin-wait period of zero counter ticks.
    #[error("period must be at least one counter tick")]
    InvalidPeriod,

    /// An initial delay too large for the signed counter arithmetic.
    #[error("initial delay of {ticks} ticks exceeds the counter range")]
    InvalidDelay { ticks: u64 },

    /// Interval outside the bounds reported by the periodic timer facility.
    #[error("interval {requested}ms out of range (must be between {min}ms and {max}ms)")]
    IntervalOutOfRange { requested: u32, min: u32, max: u32 },

    /// The timer thread could not be pinned to its dedicated core.
    #[error("failed to pin timer thread to core {core} (mask {mask:#x})")]
    AffinityFailed { core: usize, mask: u64 },

    /// The periodic timer facility refused the registration.
    #[error("periodic timer registration failed (os error {code})")]
    Registration { code: i32 },

    /// The timer has been disposed and must be reconstructed.
    #[error("timer has been disposed")]
    Disposed,

    /// The operation is only valid while the timer is stopped.
    #[error("timer is running")]
    Running,

    /// The dedicated timer thread could not be created.
    #[error("failed to spawn timer thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Result alias used across the timing crates.
pub type Result<T> = std::result::Result<T, HptError>;
