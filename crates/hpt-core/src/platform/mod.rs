//! Platform-capability interface.
//!
//! The timing engines never call the OS directly. Everything they need from
//! the environment is behind [`Platform`]:
//!
//! - a monotonic counter and its frequency
//! - processor enumeration and current-thread pinning
//! - a periodic callback facility with its capability bounds
//!
//! Implementations:
//!
//! - [`SystemPlatform`]: the host. On Windows it drives the multimedia timer
//!   (`timeSetEvent`); elsewhere the periodic facility is a [`TimerService`].
//! - [`TimerService`]: thread-backed periodic facility for hosts without one.
//! - `MockPlatform`: deterministic fake for tests, behind the `mock` feature.

use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::{HptError, Result};

#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod service;

#[cfg(windows)]
mod windows;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockPlatform;
pub use service::TimerService;

#[cfg(windows)]
pub use self::windows::SystemPlatform;

/// Callback invoked by the periodic facility on its own thread.
pub type PeriodicCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque, non-zero identifier of an armed periodic timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodicHandle(NonZeroU32);

impl PeriodicHandle {
    /// Wrap a raw facility id. Returns `None` for 0, which every facility
    /// uses to signal a failed registration.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Interval bounds, in milliseconds, supported by the periodic facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCaps {
    pub min_period_ms: u32,
    pub max_period_ms: u32,
}

impl TimerCaps {
    /// Whether `interval_ms` lies in `[min_period_ms, max_period_ms]`.
    #[inline]
    pub fn contains(&self, interval_ms: u32) -> bool {
        (self.min_period_ms..=self.max_period_ms).contains(&interval_ms)
    }

    /// Validate `interval_ms`, reporting the bounds on failure.
    pub fn check(&self, interval_ms: u32) -> Result<u32> {
        if self.contains(interval_ms) {
            Ok(interval_ms)
        } else {
            Err(HptError::IntervalOutOfRange {
                requested: interval_ms,
                min: self.min_period_ms,
                max: self.max_period_ms,
            })
        }
    }
}

/// Everything the timing engines need from the environment.
///
/// Implementations must be shareable across the caller's thread, the
/// dedicated spin-wait thread, and the facility's callback thread.
pub trait Platform: Send + Sync + 'static {
    /// Current counter reading. Non-decreasing for the process lifetime.
    fn query_counter(&self) -> i64;

    /// Counter frequency in ticks per second.
    fn query_frequency(&self) -> Result<i64>;

    /// Number of logical processors.
    fn processor_count(&self) -> usize;

    /// Pin the calling thread to `core_index` (mask `1 << core_index`).
    fn set_affinity(&self, core_index: usize) -> bool;

    /// Interval bounds of the periodic facility. Pure query.
    fn timer_capabilities(&self) -> TimerCaps;

    /// Arm a periodic timer that calls `callback` every `interval_ms`.
    fn register_periodic_timer(
        &self,
        interval_ms: u32,
        resolution_ms: u32,
        callback: PeriodicCallback,
    ) -> Result<PeriodicHandle>;

    /// Disarm a periodic timer. Once this returns the callback is not running
    /// and will not be invoked again for `handle`.
    fn cancel_periodic_timer(&self, handle: PeriodicHandle);
}

// ---------------------------------------------------------------------------
// SystemPlatform for hosts without a native periodic facility
// ---------------------------------------------------------------------------

/// The host platform.
///
/// Counter and affinity go straight to the OS. Periodic timers run on an
/// owned [`TimerService`].
#[cfg(not(windows))]
#[derive(Default)]
pub struct SystemPlatform {
    service: TimerService,
}

#[cfg(not(windows))]
impl SystemPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(windows))]
impl Platform for SystemPlatform {
    #[inline]
    fn query_counter(&self) -> i64 {
        crate::counter::query_counter()
    }

    fn query_frequency(&self) -> Result<i64> {
        crate::counter::query_frequency()
    }

    fn processor_count(&self) -> usize {
        crate::cpu_affinity::processor_count()
    }

    fn set_affinity(&self, core_index: usize) -> bool {
        crate::cpu_affinity::bind_to_core(core_index)
    }

    fn timer_capabilities(&self) -> TimerCaps {
        self.service.capabilities()
    }

    fn register_periodic_timer(
        &self,
        interval_ms: u32,
        resolution_ms: u32,
        callback: PeriodicCallback,
    ) -> Result<PeriodicHandle> {
        self.service.register(interval_ms, resolution_ms, callback)
    }

    fn cancel_periodic_timer(&self, handle: PeriodicHandle) {
        self.service.cancel(handle);
    }
}
