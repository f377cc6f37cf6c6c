//! Windows platform: performance counter plus the multimedia timer.

use std::sync::Mutex;

use ahash::AHashMap;
use tracing::{debug, warn};
use ::windows::Win32::Foundation::GetLastError;
use ::windows::Win32::Media::{
    TIME_KILL_SYNCHRONOUS, TIME_PERIODIC, TIMECAPS, TIMERR_NOERROR, timeGetDevCaps, timeKillEvent,
    timeSetEvent,
};

use super::{PeriodicCallback, PeriodicHandle, Platform, TimerCaps};
use crate::error::{HptError, Result};

/// Bounds reported when `timeGetDevCaps` fails.
const FALLBACK_CAPS: TimerCaps = TimerCaps { min_period_ms: 1, max_period_ms: 1_000_000 };

/// The host platform on Windows.
///
/// Each armed timer's callback is boxed and kept in `registrations` until
/// `timeKillEvent` returns; its address is the `dwUser` value the multimedia
/// timer hands back to [`trampoline`].
#[derive(Default)]
pub struct SystemPlatform {
    registrations: Mutex<AHashMap<u32, Box<PeriodicCallback>>>,
}

impl SystemPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<u32, Box<PeriodicCallback>>> {
        self.registrations.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

unsafe extern "system" fn trampoline(_id: u32, _msg: u32, user: usize, _dw1: usize, _dw2: usize) {
    // SAFETY: `user` is the address of a boxed callback owned by the
    // registry; it is only freed after a synchronous timeKillEvent.
    let callback = unsafe { &*(user as *const PeriodicCallback) };
    callback();
}

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
        let mut caps = TIMECAPS::default();
        // SAFETY: caps is a live TIMECAPS and the size matches it.
        let rc = unsafe { timeGetDevCaps(&mut caps, std::mem::size_of::<TIMECAPS>() as u32) };
        if rc != TIMERR_NOERROR {
            warn!("timeGetDevCaps failed ({rc}), assuming default bounds");
            return FALLBACK_CAPS;
        }
        TimerCaps { min_period_ms: caps.wPeriodMin, max_period_ms: caps.wPeriodMax }
    }

    fn register_periodic_timer(
        &self,
        interval_ms: u32,
        resolution_ms: u32,
        callback: PeriodicCallback,
    ) -> Result<PeriodicHandle> {
        let boxed = Box::new(callback);
        let user = &*boxed as *const PeriodicCallback as usize;

        // SAFETY: the trampoline matches LPTIMECALLBACK and `user` stays valid
        // until cancel_periodic_timer has killed the event.
        let id = unsafe {
            timeSetEvent(
                interval_ms,
                resolution_ms,
                Some(trampoline),
                user,
                TIME_PERIODIC | TIME_KILL_SYNCHRONOUS,
            )
        };

        let Some(handle) = PeriodicHandle::new(id) else {
            // SAFETY: reads thread-local error state only.
            let code = unsafe { GetLastError() }.0 as i32;
            return Err(HptError::Registration { code });
        };

        debug!("timeSetEvent armed #{id} every {interval_ms}ms (resolution {resolution_ms}ms)");
        self.lock().insert(id, boxed);
        Ok(handle)
    }

    fn cancel_periodic_timer(&self, handle: PeriodicHandle) {
        // SAFETY: the id came from timeSetEvent. TIME_KILL_SYNCHRONOUS means
        // no callback is running or pending once this returns.
        let rc = unsafe { timeKillEvent(handle.get()) };
        if rc != TIMERR_NOERROR {
            warn!("timeKillEvent #{} returned {rc}", handle.get());
        }
        self.lock().remove(&handle.get());
    }
}

impl Drop for SystemPlatform {
    fn drop(&mut self) {
        let ids: Vec<u32> = self.lock().keys().copied().collect();
        for id in ids {
            if let Some(handle) = PeriodicHandle::new(id) {
                self.cancel_periodic_timer(handle);
            }
        }
    }
}
