//! Timers on the host platform.
//!
//! Assertions here are deliberately loose so they hold on a loaded CI box.
//! The precision scenarios need an otherwise idle core and are `#[ignore]`d;
//! run them with `cargo test -- --ignored` on a quiet machine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use hpt_core::cpu_affinity::processor_count;
use hpt_core::jitter::JitterCollector;
use hpt_timer::{HptError, PeriodicCallbackTimer, SpinWaitConfig, SpinWaitTimer, TimerId};

fn collector() -> (Arc<Mutex<JitterCollector>>, impl FnMut(TimerId, f64, i64) + Send + 'static) {
    let stats = Arc::new(Mutex::new(JitterCollector::new()));
    let sink = Arc::clone(&stats);
    (stats, move |_: TimerId, ratio: f64, ticks: i64| sink.lock().unwrap().record(ratio, ticks))
}

#[test]
fn spin_wait_rejects_core_zero_on_host() {
    let result = SpinWaitTimer::new(SpinWaitConfig::new(0, 10_000, 0), |_: TimerId, _: f64, _: i64| {});
    assert!(matches!(result, Err(HptError::CoreIndexReserved)));
}

#[test]
fn spin_wait_rejects_missing_core_on_host() {
    let cores = processor_count();
    let result = SpinWaitTimer::new(SpinWaitConfig::new(0, 10_000, cores), |_: TimerId, _: f64, _: i64| {});
    assert!(matches!(result, Err(HptError::CoreIndexOutOfRange { .. })));
}

#[test]
fn spin_wait_ticks_and_freezes_after_dispose() {
    if processor_count() < 2 {
        return;
    }
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let timer = SpinWaitTimer::new(SpinWaitConfig::new(0, 10_000, 1), move |_: TimerId, _: f64, _: i64| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    match timer.open() {
        Ok(()) => {}
        // Containers may restrict the affinity mask.
        Err(HptError::AffinityFailed { .. }) => return,
        Err(e) => panic!("open failed: {e}"),
    }
    thread::sleep(Duration::from_millis(200));
    timer.dispose();

    let frozen = count.load(Ordering::SeqCst);
    assert!(frozen > 0);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), frozen);
}

#[test]
fn periodic_ticks_and_freezes_after_dispose() {
    let (stats, handler) = collector();
    let timer = PeriodicCallbackTimer::with_interval(handler, 1).unwrap();
    timer.open().unwrap();
    assert!(timer.is_running());
    thread::sleep(Duration::from_millis(200));
    timer.dispose();
    assert!(!timer.is_running());

    let frozen = stats.lock().unwrap().count();
    assert!(frozen > 10, "only {frozen} ticks in 200ms at 1ms");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(stats.lock().unwrap().count(), frozen);
}

#[test]
#[ignore = "needs an idle dedicated core"]
fn spin_wait_one_second_at_10000_ticks() {
    if processor_count() < 2 {
        return;
    }
    let (stats, handler) = collector();
    let timer = SpinWaitTimer::new(SpinWaitConfig::new(0, 10_000, 1), handler).unwrap();
    let expected = timer.frequency() as f64 / 10_000.0;

    timer.open().unwrap();
    thread::sleep(Duration::from_secs(1));
    timer.dispose();

    let stats = stats.lock().unwrap().stats().unwrap();
    assert!((stats.count as f64 - expected).abs() <= expected * 0.05 + 1.0, "{stats}");
    assert!((stats.mean_elapsed_ticks - 10_000.0).abs() / 10_000.0 < 0.01, "{stats}");
    assert!(stats.min_ratio >= 0.9 && stats.max_ratio <= 1.1, "{stats}");
}

#[test]
#[ignore = "depends on OS timer jitter"]
fn periodic_one_second_at_1ms() {
    let (stats, handler) = collector();
    let timer = PeriodicCallbackTimer::with_interval(handler, 1).unwrap();

    timer.open().unwrap();
    thread::sleep(Duration::from_secs(1));
    timer.dispose();

    let stats = stats.lock().unwrap().stats().unwrap();
    assert!((900..=1100).contains(&stats.count), "{stats}");
    assert!((stats.mean_ratio - 1.0).abs() < 0.1, "{stats}");
}
