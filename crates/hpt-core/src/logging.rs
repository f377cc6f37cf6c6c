//! Subscriber setup for the timer binaries.
//!
//! Timer threads are named (`hpt-spin-core<N>`, `hpt-svc-<id>`), so both
//! layers print thread names next to the target. A run that gets a
//! `log_dir` also writes a daily-rotated plain-text file there. `RUST_LOG`
//! overrides the level passed in.
//!
//! Lifecycle transitions log at `info`/`debug`; a tick pass never logs.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, before any timer is opened.
///
/// `log_level` applies when `RUST_LOG` is unset. `file_prefix` names the
/// rotated files under `log_dir` (the runner passes `"hpt-runner"`).
pub fn init_logging(log_level: &str, log_dir: Option<&str>, file_prefix: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_ansi(true);

    if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, file_prefix);
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
    }
}
