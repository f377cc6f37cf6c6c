//! # hpt-core
//!
//! Environment layer for the high-precision timers, providing:
//!
//! - **Counter** (`counter`): monotonic high-resolution counter, frequency, stopwatch
//! - **Platform** (`platform`): the `Platform` capability trait with host and emulated-service implementations (plus a mock behind the `mock` feature)
//! - **CPU affinity** (`cpu_affinity`): processor enumeration and thread-to-core pinning
//! - **Error types** (`error`): `HptError` via thiserror
//! - **Jitter** (`jitter`): histogram-based jump-ratio statistics
//! - **Configuration** (`config`): JSON benchmark config
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod counter;
pub mod cpu_affinity;
pub mod error;
pub mod jitter;
pub mod logging;
pub mod platform;

pub use error::{HptError, Result};
pub use platform::{PeriodicCallback, PeriodicHandle, Platform, SystemPlatform, TimerCaps};

#[cfg(any(test, feature = "mock"))]
pub use platform::MockPlatform;
