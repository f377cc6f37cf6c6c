//! Mock platform for testing.
//!
//! The counter only moves when the test says so: either explicitly through
//! [`MockPlatform::advance`] or by a fixed step on every read
//! ([`MockPlatform::with_auto_step`]). Periodic timers never fire on their
//! own; tests call [`MockPlatform::fire_all`] to simulate the facility.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, Ordering};

use ahash::AHashMap;

use super::{PeriodicCallback, PeriodicHandle, Platform, TimerCaps};
use crate::error::{HptError, Result};

struct MockTimer {
    interval_ms: u32,
    callback: PeriodicCallback,
}

/// Deterministic [`Platform`] implementation.
pub struct MockPlatform {
    counter: AtomicI64,
    step: AtomicI64,
    frequency: i64,
    processors: usize,
    caps: TimerCaps,
    affinity_fails: AtomicBool,
    /// 0 means registrations succeed.
    registration_error: AtomicI32,
    /// Counter ticks consumed by each registration.
    registration_cost: i64,
    affinity_requests: Mutex<Vec<usize>>,
    next_id: AtomicU32,
    timers: Mutex<AHashMap<u32, MockTimer>>,
}

impl MockPlatform {
    /// 10 MHz counter, 4 processors, 1..=1_000_000 ms caps.
    pub fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
            step: AtomicI64::new(0),
            frequency: 10_000_000,
            processors: 4,
            caps: TimerCaps { min_period_ms: 1, max_period_ms: 1_000_000 },
            affinity_fails: AtomicBool::new(false),
            registration_error: AtomicI32::new(0),
            registration_cost: 0,
            affinity_requests: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            timers: Mutex::new(AHashMap::new()),
        }
    }

    pub fn with_frequency(mut self, frequency: i64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_processors(mut self, processors: usize) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_caps(mut self, min_period_ms: u32, max_period_ms: u32) -> Self {
        self.caps = TimerCaps { min_period_ms, max_period_ms };
        self
    }

    /// Every counter read returns the current value and then adds `step`.
    pub fn with_auto_step(self, step: i64) -> Self {
        self.step.store(step, Ordering::SeqCst);
        self
    }

    /// Every registration advances the counter by `ticks`, as a slow
    /// facility call would.
    pub fn with_registration_cost(mut self, ticks: i64) -> Self {
        self.registration_cost = ticks;
        self
    }

    pub fn advance(&self, ticks: i64) {
        self.counter.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set_counter(&self, value: i64) {
        self.counter.store(value, Ordering::SeqCst);
    }

    /// Counter value without consuming an auto-step.
    pub fn peek_counter(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn fail_affinity(&self, fail: bool) {
        self.affinity_fails.store(fail, Ordering::SeqCst);
    }

    /// Make the next registrations fail with `code`; `None` restores success.
    pub fn fail_registration(&self, code: Option<i32>) {
        self.registration_error.store(code.unwrap_or(0), Ordering::SeqCst);
    }

    /// Cores passed to `set_affinity`, in call order.
    pub fn affinity_requests(&self) -> Vec<usize> {
        self.affinity_requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub fn active_timers(&self) -> usize {
        self.lock_timers().len()
    }

    pub fn interval_of(&self, handle: PeriodicHandle) -> Option<u32> {
        self.lock_timers().get(&handle.get()).map(|t| t.interval_ms)
    }

    /// Invoke one armed timer's callback. Returns `false` if it is not armed.
    pub fn fire(&self, handle: PeriodicHandle) -> bool {
        let callback = self.lock_timers().get(&handle.get()).map(|t| t.callback.clone());
        match callback {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }

    /// Invoke every armed timer's callback once. Returns how many fired.
    pub fn fire_all(&self) -> usize {
        let callbacks: Vec<PeriodicCallback> =
            self.lock_timers().values().map(|t| t.callback.clone()).collect();
        for cb in &callbacks {
            cb();
        }
        callbacks.len()
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, AHashMap<u32, MockTimer>> {
        self.timers.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    fn query_counter(&self) -> i64 {
        let step = self.step.load(Ordering::Relaxed);
        self.counter.fetch_add(step, Ordering::SeqCst)
    }

    fn query_frequency(&self) -> Result<i64> {
        if self.frequency > 0 {
            Ok(self.frequency)
        } else {
            Err(HptError::CounterUnavailable { frequency: self.frequency })
        }
    }

    fn processor_count(&self) -> usize {
        self.processors
    }

    fn set_affinity(&self, core_index: usize) -> bool {
        self.affinity_requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(core_index);
        !self.affinity_fails.load(Ordering::SeqCst) && core_index < self.processors
    }

    fn timer_capabilities(&self) -> TimerCaps {
        self.caps
    }

    fn register_periodic_timer(
        &self,
        interval_ms: u32,
        _resolution_ms: u32,
        callback: PeriodicCallback,
    ) -> Result<PeriodicHandle> {
        self.counter.fetch_add(self.registration_cost, Ordering::SeqCst);
        let code = self.registration_error.load(Ordering::SeqCst);
        if code != 0 {
            return Err(HptError::Registration { code });
        }
        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = PeriodicHandle::new(raw).ok_or(HptError::Registration { code: -1 })?;
        self.lock_timers().insert(raw, MockTimer { interval_ms, callback });
        Ok(handle)
    }

    fn cancel_periodic_timer(&self, handle: PeriodicHandle) {
        self.lock_timers().remove(&handle.get());
    }
}
