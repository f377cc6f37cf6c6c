//! Configuration for the benchmark runner.
//!
//! Settings come from a single optional JSON file. Every field has a default
//! so an empty object (or no file at all) reproduces the reference run: a
//! spin-wait timer on core 1 every 10000 counter ticks and a periodic timer
//! every 1ms, each for 10 seconds.
//!
//! # Example config
//!
//! ```json
//! {
//!   "spin_wait": { "period_ticks": 10000, "core_index": 1 },
//!   "periodic": { "interval_ms": 1 },
//!   "run_seconds": 10,
//!   "tolerance": 0.1,
//!   "log_dir": "/tmp/hpt"
//! }
//! ```

use serde::Deserialize;

/// Top-level benchmark config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub spin_wait: SpinWaitSettings,
    pub periodic: PeriodicSettings,
    /// Wall-clock duration of each timer run.
    pub run_seconds: u64,
    /// Allowed `|jump_ratio - 1|` before a tick counts as off schedule.
    pub tolerance: f64,
    /// Optional directory for daily-rotating log files.
    pub log_dir: Option<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            spin_wait: SpinWaitSettings::default(),
            periodic: PeriodicSettings::default(),
            run_seconds: 10,
            tolerance: crate::jitter::DEFAULT_TOLERANCE,
            log_dir: None,
        }
    }
}

/// Spin-wait timer parameters, all in counter ticks except the core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpinWaitSettings {
    pub initial_delay_ticks: u64,
    pub period_ticks: u64,
    pub core_index: usize,
}

impl Default for SpinWaitSettings {
    fn default() -> Self {
        Self { initial_delay_ticks: 0, period_ticks: 10_000, core_index: 1 }
    }
}

/// Periodic callback timer parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeriodicSettings {
    pub interval_ms: u32,
}

impl Default for PeriodicSettings {
    fn default() -> Self {
        Self { interval_ms: 1 }
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<BenchConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: BenchConfig = serde_json::from_str(&content)?;
    Ok(config)
}
