//! Timer driven by the OS periodic callback facility.
//!
//! [`PeriodicCallbackTimer`] owns no thread. It arms a periodic timer through
//! [`Platform::register_periodic_timer`] and, on every callback, restarts a
//! counter-based stopwatch and reports how long the interval really was
//! relative to the nominal `interval` in milliseconds.
//!
//! Precision is bounded by the facility (typically 1 ms); CPU cost is
//! negligible. Ticks arrive on the facility's thread. The facility is
//! expected not to overlap callbacks for one timer; the handler lock
//! serializes them anyway.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use hpt_core::counter::Stopwatch;
use hpt_core::platform::{PeriodicCallback, PeriodicHandle};
use hpt_core::{HptError, Platform, Result, SystemPlatform, TimerCaps};
use tracing::{debug, info};

use crate::lock;
use crate::tick::{TickHandler, TimerId, TimerKind};

/// Interval used when none is given, raised to the facility minimum if needed.
pub const DEFAULT_INTERVAL_MS: u32 = 1;

/// State reachable from the facility callback.
struct TickState {
    id: TimerId,
    frequency: i64,
    interval_ms: AtomicU32,
    stopwatch: Stopwatch,
    handler: Mutex<Option<Box<dyn TickHandler>>>,
}

impl TickState {
    fn tick(&self, now: i64) {
        let elapsed = self.stopwatch.restart(now);
        let interval = self.interval_ms.load(Ordering::Relaxed);
        let jump_ratio = elapsed as f64 * 1000.0 / self.frequency as f64 / f64::from(interval);
        if let Some(handler) = lock(&self.handler).as_mut() {
            handler.on_tick(self.id, jump_ratio, elapsed);
        }
    }
}

/// Periodic timer on top of the OS multimedia-style timer facility.
///
/// `dispose()` (also run on drop) disarms the facility timer before the
/// handler is released, so a late facility event can never reach a dropped
/// handler. Do not dispose or close a timer from inside its own handler on
/// a native facility that cannot cancel from its callback thread.
pub struct PeriodicCallbackTimer<P: Platform = SystemPlatform> {
    platform: Arc<P>,
    state: Arc<TickState>,
    handle: Mutex<Option<PeriodicHandle>>,
    running: AtomicBool,
    disposed: AtomicBool,
}

impl PeriodicCallbackTimer<SystemPlatform> {
    /// Construct on the host platform with the default interval.
    pub fn new(handler: impl TickHandler) -> Result<Self> {
        Self::with_platform(Arc::new(SystemPlatform::new()), handler)
    }

    /// Construct on the host platform with `interval_ms`.
    pub fn with_interval(handler: impl TickHandler, interval_ms: u32) -> Result<Self> {
        let timer = Self::new(handler)?;
        timer.set_interval(interval_ms)?;
        Ok(timer)
    }
}

impl<P: Platform> PeriodicCallbackTimer<P> {
    /// Construct on an explicit platform.
    ///
    /// The interval starts at [`DEFAULT_INTERVAL_MS`], or at the facility
    /// minimum when that is larger.
    pub fn with_platform(platform: Arc<P>, handler: impl TickHandler) -> Result<Self> {
        let frequency = platform.query_frequency()?;
        let caps = platform.timer_capabilities();
        let interval_ms = caps.check(DEFAULT_INTERVAL_MS.max(caps.min_period_ms))?;
        let now = platform.query_counter();

        Ok(Self {
            platform,
            state: Arc::new(TickState {
                id: TimerId::next(TimerKind::Periodic),
                frequency,
                interval_ms: AtomicU32::new(interval_ms),
                stopwatch: Stopwatch::new(now),
                handler: Mutex::new(Some(Box::new(handler))),
            }),
            handle: Mutex::new(None),
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Nominal interval in milliseconds.
    pub fn interval(&self) -> u32 {
        self.state.interval_ms.load(Ordering::Acquire)
    }

    /// Change the interval. Only allowed while stopped.
    ///
    /// # Errors
    ///
    /// - [`HptError::IntervalOutOfRange`] outside the facility bounds; the
    ///   previous interval is kept
    /// - [`HptError::Running`] while the timer is armed
    /// - [`HptError::Disposed`] after `dispose()`
    pub fn set_interval(&self, interval_ms: u32) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HptError::Disposed);
        }
        let slot = lock(&self.handle);
        if slot.is_some() {
            return Err(HptError::Running);
        }
        let interval_ms = self.platform.timer_capabilities().check(interval_ms)?;
        self.state.interval_ms.store(interval_ms, Ordering::Release);
        Ok(())
    }

    /// Whether a facility timer is currently armed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> TimerId {
        self.state.id
    }

    /// Interval bounds supported by the facility. Pure query, always available.
    pub fn timer_caps(&self) -> TimerCaps {
        self.platform.timer_capabilities()
    }

    /// Arm the facility timer. No-op if already running.
    ///
    /// # Errors
    ///
    /// - [`HptError::Registration`] with the facility's error code
    /// - [`HptError::Disposed`] after `dispose()`
    pub fn open(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HptError::Disposed);
        }
        let mut slot = lock(&self.handle);
        if slot.is_some() {
            return Ok(());
        }
        // dispose() may have run between the check above and taking the slot;
        // its close() found nothing to cancel, so arming now would leak.
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HptError::Disposed);
        }

        let interval_ms = self.interval();
        let resolution_ms = self.platform.timer_capabilities().min_period_ms;

        let platform = Arc::clone(&self.platform);
        let state = Arc::clone(&self.state);
        let callback: PeriodicCallback = Arc::new(move || state.tick(platform.query_counter()));

        let handle = self.platform.register_periodic_timer(interval_ms, resolution_ms, callback)?;
        self.state.stopwatch.restart(self.platform.query_counter());

        *slot = Some(handle);
        self.running.store(true, Ordering::Release);
        info!("{} opened: interval={interval_ms}ms resolution={resolution_ms}ms", self.state.id);
        Ok(())
    }

    /// Disarm the facility timer without disposing; the timer can be
    /// reconfigured and opened again.
    pub fn close(&self) {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            self.platform.cancel_periodic_timer(handle);
            self.running.store(false, Ordering::Release);
            debug!("{} closed", self.state.id);
        }
    }

    /// Disarm the timer and release the handler.
    ///
    /// One-shot: the explicit call and the drop path share the same guard,
    /// so the facility timer is cancelled exactly once. Never panics.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close();

        // After cancel no callback is running, unless this is the callback.
        match self.state.handler.try_lock() {
            Ok(mut handler) => drop(handler.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {}
        }
        info!("{} disposed", self.state.id);
    }
}

impl<P: Platform> Drop for PeriodicCallbackTimer<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}
