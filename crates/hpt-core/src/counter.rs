//! High-resolution monotonic counter.
//!
//! Provides a raw tick counter and its frequency (ticks per second):
//! `QueryPerformanceCounter` on Windows, `clock_gettime(CLOCK_MONOTONIC_RAW)`
//! on Linux and a process-origin `Instant` elsewhere. Readings are
//! non-decreasing and the frequency is fixed for the process lifetime.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{HptError, Result};

/// Frequency of the nanosecond-based counters.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Windows: performance counter
// ---------------------------------------------------------------------------

#[cfg(windows)]
#[inline]
fn raw_counter() -> i64 {
    use windows::Win32::System::Performance::QueryPerformanceCounter;
    let mut ticks = 0i64;
    // SAFETY: the out pointer refers to a live local.
    let _ = unsafe { QueryPerformanceCounter(&mut ticks) };
    ticks
}

#[cfg(windows)]
fn raw_frequency() -> i64 {
    use windows::Win32::System::Performance::QueryPerformanceFrequency;
    let mut freq = 0i64;
    // SAFETY: the out pointer refers to a live local.
    match unsafe { QueryPerformanceFrequency(&mut freq) } {
        Ok(()) => freq,
        Err(_) => 0,
    }
}

// ---------------------------------------------------------------------------
// Linux: raw monotonic clock, immune to NTP slewing
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
#[inline]
fn raw_counter() -> i64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: CLOCK_MONOTONIC_RAW is always valid on Linux.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
    }
    ts.tv_sec as i64 * NANOS_PER_SECOND + ts.tv_nsec as i64
}

#[cfg(target_os = "linux")]
fn raw_frequency() -> i64 {
    NANOS_PER_SECOND
}

// ---------------------------------------------------------------------------
// Other platforms: Instant fallback
// ---------------------------------------------------------------------------

#[cfg(not(any(windows, target_os = "linux")))]
#[inline]
fn raw_counter() -> i64 {
    use std::{sync::LazyLock, time::Instant};
    static ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);
    ORIGIN.elapsed().as_nanos() as i64
}

#[cfg(not(any(windows, target_os = "linux")))]
fn raw_frequency() -> i64 {
    NANOS_PER_SECOND
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Current value of the host counter, in counter ticks.
#[inline]
pub fn query_counter() -> i64 {
    raw_counter()
}

/// Host counter frequency in ticks per second.
///
/// Fails with [`HptError::CounterUnavailable`] if the OS reports a
/// non-positive frequency.
pub fn query_frequency() -> Result<i64> {
    let frequency = raw_frequency();
    if frequency > 0 {
        Ok(frequency)
    } else {
        Err(HptError::CounterUnavailable { frequency })
    }
}

/// Convert a tick delta to seconds.
#[inline]
pub fn ticks_to_seconds(ticks: i64, frequency: i64) -> f64 {
    ticks as f64 / frequency as f64
}

/// Convert a tick delta to milliseconds.
#[inline]
pub fn ticks_to_millis(ticks: i64, frequency: i64) -> f64 {
    ticks as f64 * 1000.0 / frequency as f64
}

/// Convert whole milliseconds to counter ticks, saturating at `i64::MAX`.
#[inline]
pub fn millis_to_ticks(millis: u64, frequency: i64) -> i64 {
    let ticks = u128::from(millis) * frequency.max(0) as u128 / 1000;
    ticks.min(i64::MAX as u128) as i64
}

/// Convert a `Duration` to whole counter ticks, saturating at `i64::MAX`.
#[inline]
pub fn duration_to_ticks(duration: std::time::Duration, frequency: i64) -> i64 {
    let ticks = duration.as_nanos() * frequency as u128 / NANOS_PER_SECOND as u128;
    ticks.min(i64::MAX as u128) as i64
}

/// Elapsed-ticks stopwatch shared between the arming thread and the thread
/// that delivers ticks.
///
/// The caller supplies counter readings so the stopwatch works with any
/// counter source, including a fake one.
#[derive(Debug, Default)]
pub struct Stopwatch {
    start: AtomicI64,
}

impl Stopwatch {
    pub fn new(now: i64) -> Self {
        Self { start: AtomicI64::new(now) }
    }

    /// Restart at `now` and return the ticks elapsed since the previous start.
    ///
    /// Fetch and reset happen in a single atomic swap.
    #[inline]
    pub fn restart(&self, now: i64) -> i64 {
        now - self.start.swap(now, Ordering::AcqRel)
    }

    /// Ticks elapsed since the last start, without restarting.
    #[inline]
    pub fn elapsed(&self, now: i64) -> i64 {
        now - self.start.load(Ordering::Acquire)
    }
}
