//! Tracing subscriber setup.
//!
//! Logs go to stderr and to a daily-rotated `app.log` under the configured
//! log directory, keeping the last [`LOG_FILES_KEPT`] files. `RUST_LOG` wins
//! over the configured level when set.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Rotated log files retained in the log directory.
pub const LOG_FILES_KEPT: usize = 7;

fn file_appender(log_dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("app.log")
        .max_log_files(LOG_FILES_KEPT)
        .build(log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to open log file in {}: {}", log_dir.display(), e))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// fail with an error the caller may ignore.
pub fn init(log_level: &str, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);
    let _ = LOG_GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", log_level, e))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(std::env::var("NO_COLOR").is_err());
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    Ok(())
}
