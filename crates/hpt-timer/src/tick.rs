//! Callback contract shared by both timers.
//!
//! Every tick reports `(timer, jump_ratio, elapsed_ticks)`:
//!
//! - `timer` identifies which instance fired
//! - `jump_ratio` is the actual interval over the nominal one; `1.0` is
//!   exactly on schedule, `> 1.0` late, `< 1.0` early
//! - `elapsed_ticks` is the raw counter delta since the previous tick

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which strategy a timer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    SpinWait,
    Periodic,
}

/// Identity of a timer instance, passed to every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub kind: TimerKind,
    pub seq: u64,
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

impl TimerId {
    pub(crate) fn next(kind: TimerKind) -> Self {
        Self { kind, seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed) }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TimerKind::SpinWait => write!(f, "spin-wait#{}", self.seq),
            TimerKind::Periodic => write!(f, "periodic#{}", self.seq),
        }
    }
}

/// Receiver of timer ticks.
///
/// Runs on the timer's execution context (the dedicated core for
/// `SpinWaitTimer`, the facility's thread for `PeriodicCallbackTimer`), so it
/// must return quickly. A handler that never returns stalls every later tick
/// and blocks disposal.
pub trait TickHandler: Send + 'static {
    fn on_tick(&mut self, timer: TimerId, jump_ratio: f64, elapsed_ticks: i64);
}

impl<F> TickHandler for F
where
    F: FnMut(TimerId, f64, i64) + Send + 'static,
{
    #[inline]
    fn on_tick(&mut self, timer: TimerId, jump_ratio: f64, elapsed_ticks: i64) {
        self(timer, jump_ratio, elapsed_ticks)
    }
}

/// `elapsed / nominal` as a float. Reporting only; never used as a predicate.
#[inline]
pub fn jump_ratio(elapsed: i64, nominal: i64) -> f64 {
    elapsed as f64 / nominal as f64
}
