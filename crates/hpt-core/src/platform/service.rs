//! Thread-backed periodic callback facility.
//!
//! Stands in for an OS multimedia timer on hosts that do not offer one. Each
//! registration gets a service thread that waits on absolute deadlines, so a
//! slow wake-up does not push every later tick back. The wait is a
//! `crossbeam-channel` deadline receive on a cancel channel: dropping the
//! sender wakes the thread immediately.
//!
//! Cancellation is cancel-then-join. When [`TimerService::cancel`] returns
//! the callback is not running and never will be again, which is the same
//! guarantee `timeKillEvent(TIME_KILL_SYNCHRONOUS)` gives.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use super::{PeriodicCallback, PeriodicHandle, TimerCaps};
use crate::error::{HptError, Result};

/// Bounds advertised by the service, matching the usual multimedia timer range.
pub const SERVICE_CAPS: TimerCaps = TimerCaps { min_period_ms: 1, max_period_ms: 1_000_000 };

/// Registration error code for an interval outside [`SERVICE_CAPS`] (`EINVAL`).
pub const INVALID_INTERVAL: i32 = 22;

struct Registration {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

/// Periodic callback facility backed by one thread per armed timer.
pub struct TimerService {
    next_id: AtomicU32,
    registrations: Mutex<AHashMap<u32, Registration>>,
}

impl TimerService {
    pub fn new() -> Self {
        Self { next_id: AtomicU32::new(1), registrations: Mutex::new(AHashMap::new()) }
    }

    pub fn capabilities(&self) -> TimerCaps {
        SERVICE_CAPS
    }

    /// Number of armed timers.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    /// Arm a periodic timer. `resolution_ms` is accepted for interface
    /// parity; deadlines are tracked at `Instant` resolution.
    pub fn register(
        &self,
        interval_ms: u32,
        resolution_ms: u32,
        callback: PeriodicCallback,
    ) -> Result<PeriodicHandle> {
        if !SERVICE_CAPS.contains(interval_ms) {
            warn!("timer service rejected interval {interval_ms}ms");
            return Err(HptError::Registration { code: INVALID_INTERVAL });
        }

        let handle = self.allocate_handle();
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(0);
        let period = Duration::from_millis(u64::from(interval_ms));

        // Held until the entry is in place, so a cancel from the first
        // callback always finds it.
        let mut registrations = self.lock();
        let thread = thread::Builder::new()
            .name(format!("hpt-svc-{}", handle.get()))
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    match cancelled.recv_deadline(deadline) {
                        Err(RecvTimeoutError::Timeout) => {
                            callback();
                            deadline += period;
                            let now = Instant::now();
                            if deadline <= now {
                                // Fell more than a period behind; resume from now.
                                deadline = now + period;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| HptError::Registration { code: e.raw_os_error().unwrap_or(-1) })?;

        registrations.insert(handle.get(), Registration { cancel, thread });
        drop(registrations);

        debug!(
            "timer service armed #{} every {interval_ms}ms (resolution {resolution_ms}ms)",
            handle.get()
        );
        Ok(handle)
    }

    /// Disarm a timer and wait for its thread to finish.
    ///
    /// Called from inside the timer's own callback, the thread is told to stop
    /// but not joined.
    pub fn cancel(&self, handle: PeriodicHandle) {
        let Some(registration) = self.lock().remove(&handle.get()) else {
            return;
        };
        Self::shutdown(handle.get(), registration);
    }

    fn shutdown(id: u32, registration: Registration) {
        let Registration { cancel, thread } = registration;
        drop(cancel);
        if thread.thread().id() == thread::current().id() {
            debug!("timer service #{id} cancelled from its own callback");
            return;
        }
        if thread.join().is_err() {
            error!("timer service #{id}: callback panicked");
        } else {
            debug!("timer service #{id} cancelled");
        }
    }

    fn allocate_handle(&self) -> PeriodicHandle {
        loop {
            let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
            if let Some(handle) = PeriodicHandle::new(raw) {
                return handle;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<u32, Registration>> {
        self.registrations.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (id, registration) in drained {
            Self::shutdown(id, registration);
        }
    }
}
