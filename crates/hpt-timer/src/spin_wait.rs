//! Busy-polling timer pinned to a dedicated core.
//!
//! [`SpinWaitTimer`] owns one thread for its whole life. The thread pins
//! itself to `core_index`, optionally spins through an initial delay, then
//! polls the counter in a tight loop and fires the handler whenever more than
//! `period_ticks` have elapsed since the previous tick. It never sleeps and
//! never yields, so the core is fully consumed while the timer runs.
//!
//! # Shutdown
//!
//! Each loop pass raises an in-flight flag, re-checks `disposed`, and only
//! then reads the counter and possibly fires. `dispose()` sets `disposed`
//! and waits for the in-flight flag to drop. Both sides use `SeqCst`, so
//! either the loop sees `disposed` before firing or `dispose()` sees the pass
//! in flight and waits for it: no tick can start after `dispose()` returns.
//!
//! Cancellation is cooperative. A handler that never returns makes
//! `dispose()` wait forever; that is the price of never interrupting the
//! hot loop.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::Sender;
use hpt_core::counter::duration_to_ticks;
use hpt_core::cpu_affinity::core_mask;
use hpt_core::{HptError, Platform, Result, SystemPlatform};
use tracing::{debug, error, info, warn};

use crate::lock;
use crate::tick::{TickHandler, TimerId, TimerKind, jump_ratio};

/// Timing parameters, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinWaitConfig {
    /// Counter ticks to wait after `open()` before the first baseline; 0 = none.
    pub initial_delay_ticks: u64,
    /// Counter delta that must be exceeded to fire a tick.
    pub period_ticks: u64,
    /// Logical processor the timer thread occupies. Must be in `1..processors`.
    pub core_index: usize,
}

impl SpinWaitConfig {
    pub fn new(initial_delay_ticks: u64, period_ticks: u64, core_index: usize) -> Self {
        Self { initial_delay_ticks, period_ticks, core_index }
    }

    /// Build from wall-clock durations using the counter `frequency`.
    pub fn from_durations(
        initial_delay: Duration,
        period: Duration,
        core_index: usize,
        frequency: i64,
    ) -> Self {
        Self {
            initial_delay_ticks: duration_to_ticks(initial_delay, frequency) as u64,
            period_ticks: duration_to_ticks(period, frequency) as u64,
            core_index,
        }
    }
}

struct Shared {
    disposed: AtomicBool,
    in_pass: AtomicBool,
    worker: OnceLock<ThreadId>,
}

/// Clears the in-flight flag when a pass ends, including by unwinding.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    #[inline]
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PassGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// High-precision timer that busy-waits on a dedicated core.
///
/// At most one instance per core; core 0 is never used. See the module docs
/// for the shutdown protocol.
pub struct SpinWaitTimer<P: Platform = SystemPlatform> {
    id: TimerId,
    config: SpinWaitConfig,
    period: i64,
    initial_delay: i64,
    frequency: i64,
    platform: Arc<P>,
    shared: Arc<Shared>,
    handler: Mutex<Option<Box<dyn TickHandler>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SpinWaitTimer<SystemPlatform> {
    /// Construct on the host platform.
    pub fn new(config: SpinWaitConfig, handler: impl TickHandler) -> Result<Self> {
        Self::with_platform(Arc::new(SystemPlatform::new()), config, handler)
    }
}

impl<P: Platform> SpinWaitTimer<P> {
    /// Construct on an explicit platform.
    ///
    /// # Errors
    ///
    /// - [`HptError::CounterUnavailable`] if the counter frequency is not positive
    /// - [`HptError::InvalidPeriod`] for a zero (or unrepresentable) period
    /// - [`HptError::InvalidDelay`] for an initial delay past `i64::MAX` ticks
    /// - [`HptError::CoreIndexReserved`] for core 0
    /// - [`HptError::CoreIndexOutOfRange`] for a core at or past the processor count
    ///
    /// No thread exists until [`open`](Self::open).
    pub fn with_platform(
        platform: Arc<P>,
        config: SpinWaitConfig,
        handler: impl TickHandler,
    ) -> Result<Self> {
        let frequency = platform.query_frequency()?;

        let period = i64::try_from(config.period_ticks).map_err(|_| HptError::InvalidPeriod)?;
        if period == 0 {
            return Err(HptError::InvalidPeriod);
        }
        let initial_delay = i64::try_from(config.initial_delay_ticks)
            .map_err(|_| HptError::InvalidDelay { ticks: config.initial_delay_ticks })?;

        if config.core_index == 0 {
            return Err(HptError::CoreIndexReserved);
        }
        let processors = platform.processor_count();
        if config.core_index >= processors {
            return Err(HptError::CoreIndexOutOfRange { requested: config.core_index, processors });
        }

        Ok(Self {
            id: TimerId::next(TimerKind::SpinWait),
            config,
            period,
            initial_delay,
            frequency,
            platform,
            shared: Arc::new(Shared {
                disposed: AtomicBool::new(false),
                in_pass: AtomicBool::new(false),
                worker: OnceLock::new(),
            }),
            handler: Mutex::new(Some(Box::new(handler))),
            thread: Mutex::new(None),
        })
    }

    /// Start ticking.
    ///
    /// Records the counter baseline, spawns the timer thread and waits until
    /// it has pinned itself, so a pinning failure is reported here. Calling
    /// `open()` on a timer that is already open is a no-op. A failed `open()`
    /// consumes the timer.
    ///
    /// # Errors
    ///
    /// - [`HptError::Disposed`] after `dispose()` or a failed `open()`
    /// - [`HptError::ThreadSpawn`] if the thread cannot be created
    /// - [`HptError::AffinityFailed`] if the thread cannot be pinned
    pub fn open(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(HptError::Disposed);
        }

        let mut slot = lock(&self.thread);
        if slot.is_some() {
            debug!("{} already open", self.id);
            return Ok(());
        }
        let Some(handler) = lock(&self.handler).take() else {
            return Err(HptError::Disposed);
        };

        let core = self.config.core_index;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<bool>(1);
        let worker = SpinLoop {
            id: self.id,
            core,
            period: self.period,
            initial_delay: self.initial_delay,
            baseline: self.platform.query_counter(),
            platform: Arc::clone(&self.platform),
            shared: Arc::clone(&self.shared),
            handler,
        };

        let handle = match thread::Builder::new()
            .name(format!("hpt-spin-core{core}"))
            .spawn(move || worker.run(ready_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.disposed.store(true, Ordering::SeqCst);
                error!("{}: failed to spawn timer thread: {e}", self.id);
                return Err(HptError::ThreadSpawn(e));
            }
        };

        if ready_rx.recv().unwrap_or(false) {
            *slot = Some(handle);
            info!(
                "{} opened on core {core}: period={} ticks, delay={} ticks, freq={}Hz",
                self.id, self.period, self.initial_delay, self.frequency
            );
            Ok(())
        } else {
            self.shared.disposed.store(true, Ordering::SeqCst);
            let _ = handle.join();
            error!("{}: could not pin timer thread to core {core}", self.id);
            Err(HptError::AffinityFailed { core, mask: core_mask(core) })
        }
    }

    /// Stop the timer and release its thread.
    ///
    /// After this returns no tick is executing and none will start. Any tick
    /// in flight is allowed to finish first. Safe to call any number of
    /// times, before `open()`, and from the tick handler itself (in which
    /// case the timer stops after the current tick and this call does not
    /// wait). Never panics; a handler panic is logged here.
    pub fn dispose(&self) {
        let first = !self.shared.disposed.swap(true, Ordering::SeqCst);

        if self.shared.worker.get() == Some(&thread::current().id()) {
            return;
        }

        while self.shared.in_pass.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let handle = lock(&self.thread).take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(()) => info!("{} disposed", self.id),
                Err(_) => error!("{}: tick handler panicked, timer stopped", self.id),
            },
            None if first => {
                lock(&self.handler).take();
                debug!("{} disposed without running", self.id);
            }
            None => {}
        }
    }

    /// Whether the timer thread is alive and ticking.
    pub fn is_running(&self) -> bool {
        !self.shared.disposed.load(Ordering::SeqCst)
            && lock(&self.thread).as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn config(&self) -> &SpinWaitConfig {
        &self.config
    }

    /// Counter frequency in ticks per second.
    pub fn frequency(&self) -> i64 {
        self.frequency
    }
}

impl<P: Platform> Drop for SpinWaitTimer<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// State moved onto the timer thread.
struct SpinLoop<P: Platform> {
    id: TimerId,
    core: usize,
    period: i64,
    initial_delay: i64,
    baseline: i64,
    platform: Arc<P>,
    shared: Arc<Shared>,
    handler: Box<dyn TickHandler>,
}

impl<P: Platform> SpinLoop<P> {
    fn run(mut self, ready: Sender<bool>) {
        let _ = self.shared.worker.set(thread::current().id());

        if !self.platform.set_affinity(self.core) {
            warn!("{}: affinity mask {:#x} rejected", self.id, core_mask(self.core));
            let _ = ready.send(false);
            return;
        }
        let _ = ready.send(true);
        drop(ready);

        if self.initial_delay > 0 {
            let start_at = self.baseline.saturating_add(self.initial_delay);
            while self.platform.query_counter() < start_at {
                if self.shared.disposed.load(Ordering::Relaxed) {
                    return;
                }
                hint::spin_loop();
            }
        }

        // Baseline after the delay, so the delay never counts as a jump.
        let mut previous = self.platform.query_counter();

        while !self.shared.disposed.load(Ordering::Relaxed) {
            let pass = PassGuard::enter(&self.shared.in_pass);
            if self.shared.disposed.load(Ordering::SeqCst) {
                break;
            }

            let current = self.platform.query_counter();
            let elapsed = current - previous;
            if elapsed > self.period {
                self.handler.on_tick(self.id, jump_ratio(elapsed, self.period), elapsed);
                previous = current;
            }

            drop(pass);
            hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use hpt_core::MockPlatform;

    use super::*;

    fn noop(_: TimerId, _: f64, _: i64) {}

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn core_zero_is_reserved() {
        let platform = Arc::new(MockPlatform::new());
        let err = SpinWaitTimer::with_platform(platform.clone(), SpinWaitConfig::new(0, 100, 0), noop)
            .err()
            .unwrap();
        assert!(matches!(err, HptError::CoreIndexReserved));
        assert!(platform.affinity_requests().is_empty());
    }

    #[test]
    fn core_past_processor_count_is_rejected() {
        let platform = Arc::new(MockPlatform::new().with_processors(4));
        let err = SpinWaitTimer::with_platform(platform, SpinWaitConfig::new(0, 100, 4), noop)
            .err()
            .unwrap();
        assert!(matches!(err, HptError::CoreIndexOutOfRange { requested: 4, processors: 4 }));
    }

    #[test]
    fn zero_period_is_rejected() {
        let platform = Arc::new(MockPlatform::new());
        let err = SpinWaitTimer::with_platform(platform, SpinWaitConfig::new(0, 0, 1), noop)
            .err()
            .unwrap();
        assert!(matches!(err, HptError::InvalidPeriod));
    }

    #[test]
    fn oversized_delay_reports_the_delay() {
        let platform = Arc::new(MockPlatform::new());
        let delay = i64::MAX as u64 + 1;
        let err = SpinWaitTimer::with_platform(platform, SpinWaitConfig::new(delay, 100, 1), noop)
            .err()
            .unwrap();
        assert!(matches!(err, HptError::InvalidDelay { ticks } if ticks == delay));
    }

    #[test]
    fn dead_counter_is_rejected() {
        let platform = Arc::new(MockPlatform::new().with_frequency(0));
        let err = SpinWaitTimer::with_platform(platform, SpinWaitConfig::new(0, 100, 1), noop)
            .err()
            .unwrap();
        assert!(matches!(err, HptError::CounterUnavailable { .. }));
    }

    #[test]
    fn from_durations_converts_with_frequency() {
        let config = SpinWaitConfig::from_durations(
            Duration::from_millis(5),
            Duration::from_micros(100),
            2,
            10_000_000,
        );
        assert_eq!(config, SpinWaitConfig::new(50_000, 1_000, 2));
    }

    #[test]
    fn ticks_report_exact_deltas() {
        // Every counter read advances by 1, so each tick sees exactly period + 1.
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let timer = SpinWaitTimer::with_platform(
            platform.clone(),
            SpinWaitConfig::new(0, 10, 1),
            move |_: TimerId, ratio: f64, ticks: i64| sink.lock().unwrap().push((ratio, ticks)),
        )
        .unwrap();

        timer.open().unwrap();
        assert!(wait_for(|| seen.lock().unwrap().len() >= 20));
        timer.dispose();

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|&(ratio, ticks)| ticks == 11 && (ratio - 1.1).abs() < 1e-12));
        assert_eq!(platform.affinity_requests(), vec![1]);
    }

    #[test]
    fn initial_delay_is_not_a_jump() {
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let first = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&first);
        let timer = SpinWaitTimer::with_platform(
            platform,
            SpinWaitConfig::new(10_000, 10, 1),
            move |_: TimerId, _: f64, ticks: i64| {
                sink.lock().unwrap().get_or_insert(ticks);
            },
        )
        .unwrap();

        timer.open().unwrap();
        assert!(wait_for(|| first.lock().unwrap().is_some()));
        timer.dispose();
        assert_eq!(*first.lock().unwrap(), Some(11));
    }

    #[test]
    fn pinning_failure_surfaces_from_open() {
        let platform = Arc::new(MockPlatform::new());
        platform.fail_affinity(true);
        let timer = SpinWaitTimer::with_platform(platform, SpinWaitConfig::new(0, 10, 2), noop).unwrap();

        match timer.open() {
            Err(HptError::AffinityFailed { core, mask }) => {
                assert_eq!(core, 2);
                assert_eq!(mask, 0b100);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!timer.is_running());
        assert!(matches!(timer.open(), Err(HptError::Disposed)));
    }

    #[test]
    fn no_ticks_after_dispose() {
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = SpinWaitTimer::with_platform(
            platform,
            SpinWaitConfig::new(0, 5, 1),
            move |_: TimerId, _: f64, _: i64| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        timer.open().unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) > 10));
        timer.dispose();
        let frozen = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), frozen);
        assert!(!timer.is_running());
        assert!(timer.is_disposed());
    }

    #[test]
    fn second_open_is_noop_and_dispose_is_idempotent() {
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let timer = SpinWaitTimer::with_platform(platform.clone(), SpinWaitConfig::new(0, 10, 1), noop).unwrap();

        timer.open().unwrap();
        timer.open().unwrap();
        assert!(timer.is_running());
        assert_eq!(platform.affinity_requests().len(), 1);

        timer.dispose();
        timer.dispose();
        assert!(matches!(timer.open(), Err(HptError::Disposed)));
    }

    #[test]
    fn dispose_before_open() {
        let platform = Arc::new(MockPlatform::new());
        let timer = SpinWaitTimer::with_platform(platform.clone(), SpinWaitConfig::new(0, 10, 1), noop).unwrap();
        timer.dispose();
        assert!(timer.is_disposed());
        assert!(platform.affinity_requests().is_empty());
    }

    #[test]
    fn dispose_waits_for_tick_in_flight() {
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
        let timer = SpinWaitTimer::with_platform(
            platform,
            SpinWaitConfig::new(0, 10, 1),
            move |_: TimerId, _: f64, _: i64| {
                if !e.swap(true, Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                    f.store(true, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        timer.open().unwrap();
        assert!(wait_for(|| entered.load(Ordering::SeqCst)));
        timer.dispose();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn handler_panic_does_not_hang_dispose() {
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let timer = SpinWaitTimer::with_platform(
            platform,
            SpinWaitConfig::new(0, 10, 1),
            |_: TimerId, _: f64, ticks: i64| {
                if ticks > 0 {
                    panic!("control loop bug");
                }
            },
        )
        .unwrap();

        timer.open().unwrap();
        assert!(wait_for(|| !timer.is_running()));
        timer.dispose();
        assert!(timer.is_disposed());
    }

    #[test]
    fn dispose_from_handler_stops_the_timer() {
        let platform = Arc::new(MockPlatform::new().with_auto_step(1));
        let slot: Arc<OnceLock<Arc<SpinWaitTimer<MockPlatform>>>> = Arc::new(OnceLock::new());
        let count = Arc::new(AtomicUsize::new(0));
        let (s, c) = (Arc::clone(&slot), Arc::clone(&count));

        let timer = Arc::new(
            SpinWaitTimer::with_platform(
                platform,
                SpinWaitConfig::new(0, 10, 1),
                move |_: TimerId, _: f64, _: i64| {
                    if c.fetch_add(1, Ordering::SeqCst) == 2
                        && let Some(t) = s.get()
                    {
                        t.dispose();
                    }
                },
            )
            .unwrap(),
        );
        let _ = slot.set(Arc::clone(&timer));

        timer.open().unwrap();
        assert!(wait_for(|| timer.is_disposed()));
        timer.dispose();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
