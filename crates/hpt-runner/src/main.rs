//! # hpt-runner
//!
//! Benchmark harness for the high-precision timers.
//!
//! Runs a spin-wait timer, a periodic callback timer, or both, for a fixed
//! wall-clock window, collects jump-ratio statistics from every tick, and
//! reports how many ticks landed off schedule.
//!
//! # Usage
//!
//! ```bash
//! hpt-runner both --seconds 10
//! hpt-runner spin --core 2 --period 5000
//! hpt-runner --config bench.json periodic --interval 2
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hpt_core::config::{BenchConfig, load_config};
use hpt_core::counter::ticks_to_millis;
use hpt_core::jitter::JitterCollector;
use hpt_timer::{PeriodicCallbackTimer, SpinWaitConfig, SpinWaitTimer, TimerId};
use tracing::{info, warn};

/// High-precision timer benchmark.
#[derive(Parser)]
#[command(name = "hpt-runner", about = "High-precision timer benchmark")]
struct Cli {
    /// Configuration file path (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Run time per timer in seconds.
    #[arg(short, long)]
    seconds: Option<u64>,

    /// Allowed |jump_ratio - 1| before a tick counts as off schedule.
    #[arg(short, long)]
    tolerance: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Busy-wait timer on a dedicated core.
    Spin {
        /// Period in counter ticks.
        #[arg(long)]
        period: Option<u64>,
        /// Core to occupy (never 0).
        #[arg(long)]
        core: Option<usize>,
        /// Initial delay in counter ticks.
        #[arg(long)]
        delay: Option<u64>,
    },
    /// OS periodic callback timer.
    Periodic {
        /// Interval in milliseconds.
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Spin-wait first, then periodic, with config values.
    Both,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BenchConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    // 1. Initialize logging
    let log_dir = cli.log_dir.as_deref().or(config.log_dir.as_deref());
    hpt_core::logging::init_logging(&cli.log_level, log_dir, "hpt-runner");

    info!(
        "hpt-runner starting: run={}s, tolerance={}",
        config.run_seconds, config.tolerance
    );

    let run = Duration::from_secs(config.run_seconds);

    // 2. Run the selected timers
    match cli.command {
        Command::Spin { .. } => {
            run_spin(&config, run).await?;
        }
        Command::Periodic { .. } => {
            run_periodic(&config, run).await?;
        }
        Command::Both => {
            if run_spin(&config, run).await? {
                run_periodic(&config, run).await?;
            }
        }
    }

    info!("done");
    Ok(())
}

/// Fold CLI flags over the loaded config.
fn apply_overrides(config: &mut BenchConfig, cli: &Cli) {
    if let Some(s) = cli.seconds {
        config.run_seconds = s;
    }
    if let Some(t) = cli.tolerance {
        config.tolerance = t;
    }
    match &cli.command {
        Command::Spin { period, core, delay } => {
            if let Some(p) = *period {
                config.spin_wait.period_ticks = p;
            }
            if let Some(c) = *core {
                config.spin_wait.core_index = c;
            }
            if let Some(d) = *delay {
                config.spin_wait.initial_delay_ticks = d;
            }
        }
        Command::Periodic { interval } => {
            if let Some(i) = *interval {
                config.periodic.interval_ms = i;
            }
        }
        Command::Both => {}
    }
}

/// Wait for `run` or Ctrl+C. Returns `false` if interrupted.
async fn wait(run: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(run) => true,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            false
        }
    }
}

type SharedStats = Arc<Mutex<JitterCollector>>;

fn stats_handler(tolerance: f64) -> (SharedStats, impl FnMut(TimerId, f64, i64) + Send + 'static) {
    let stats = Arc::new(Mutex::new(JitterCollector::with_tolerance(tolerance)));
    let sink = Arc::clone(&stats);
    let handler = move |_: TimerId, ratio: f64, ticks: i64| {
        if let Ok(mut s) = sink.lock() {
            s.record(ratio, ticks);
        }
    };
    (stats, handler)
}

fn report(id: TimerId, stats: &SharedStats, frequency: i64) {
    let stats = stats.lock().map(|s| s.stats()).unwrap_or(None);
    match stats {
        Some(s) => {
            info!("{id}: {s}");
            info!(
                "{id}: {} ticks, {} off schedule, mean interval {:.4}ms",
                s.count,
                s.off_schedule,
                s.mean_elapsed_ticks * ticks_to_millis(1, frequency)
            );
        }
        None => warn!("{id}: no ticks recorded"),
    }
}

async fn run_spin(config: &BenchConfig, run: Duration) -> Result<bool> {
    let s = &config.spin_wait;
    let (stats, handler) = stats_handler(config.tolerance);
    let timer = SpinWaitTimer::new(
        SpinWaitConfig::new(s.initial_delay_ticks, s.period_ticks, s.core_index),
        handler,
    )?;
    let frequency = timer.frequency();

    timer.open()?;
    let completed = wait(run).await;
    timer.dispose();

    report(timer.id(), &stats, frequency);
    Ok(completed)
}

async fn run_periodic(config: &BenchConfig, run: Duration) -> Result<bool> {
    let (stats, handler) = stats_handler(config.tolerance);
    let timer = PeriodicCallbackTimer::with_interval(handler, config.periodic.interval_ms)?;
    let caps = timer.timer_caps();
    info!("{}: facility bounds {}..={}ms", timer.id(), caps.min_period_ms, caps.max_period_ms);
    let frequency = hpt_core::counter::query_frequency()?;

    timer.open()?;
    let completed = wait(run).await;
    timer.dispose();

    report(timer.id(), &stats, frequency);
    Ok(completed)
}
