//! # hpt-timer
//!
//! Sub-millisecond periodic timers for hosts whose sleep and timer APIs
//! resolve at 1–15 ms. Two strategies implement the same tick contract
//! ([`TickHandler`]):
//!
//! - [`SpinWaitTimer`]: busy-polls the high-resolution counter on a
//!   dedicated, pinned core. Highest precision; costs 100% of that core.
//! - [`PeriodicCallbackTimer`]: rides the OS periodic callback facility
//!   (typically 1 ms resolution) and measures each interval with a
//!   stopwatch. Negligible CPU; lower precision ceiling.
//!
//! Both are started with `open()` and stopped deterministically with
//! `dispose()`, which also runs on drop.
//!
//! ```no_run
//! use hpt_timer::{SpinWaitConfig, SpinWaitTimer, TimerId};
//!
//! let timer = SpinWaitTimer::new(
//!     SpinWaitConfig::new(0, 10_000, 1),
//!     |id: TimerId, ratio: f64, ticks: i64| {
//!         if (ratio - 1.0).abs() > 0.1 {
//!             eprintln!("{id} off schedule: {ratio:.3} ({ticks} ticks)");
//!         }
//!     },
//! )?;
//! timer.open()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! timer.dispose();
//! # Ok::<(), hpt_core::HptError>(())
//! ```

pub mod periodic;
pub mod spin_wait;
pub mod tick;

pub use hpt_core::{HptError, Platform, Result, SystemPlatform, TimerCaps};
#[cfg(feature = "mock")]
pub use hpt_core::MockPlatform;
pub use periodic::PeriodicCallbackTimer;
pub use spin_wait::{SpinWaitConfig, SpinWaitTimer};
pub use tick::{TickHandler, TimerId, TimerKind, jump_ratio};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poison: a handler panic must not make disposal fault.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
