//! Tracing setup for the `collectbox` binary.
//!
//! A `[logging] directory` in the config always wins and sends everything to a
//! daily rolling `collectbox.log` there. Without one, Linux builds log to the
//! systemd journal and fall back to the same rolling file under the local
//! data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Environment variable holding an `EnvFilter` directive, e.g. `debug` or
/// `collectbox::backup=trace`.
pub const LOG_ENV: &str = "COLLECTBOX_LOG";

const LOG_FILE_NAME: &str = "collectbox.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(dir) = &config.directory {
        return init_file(filter, dir);
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald) = tracing_journald::layer() {
            tracing_subscriber::registry().with(filter).with(journald).init();
            tracing::debug!("Logging to the systemd journal");
            return Ok(());
        }
    }

    init_file(filter, &default_log_dir())
}

/// Where the rolling log file goes when no directory is configured.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("collectbox")
        .join("logs")
}

fn init_file(filter: EnvFilter, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        dir,
        LOG_FILE_NAME,
    ));
    // Buffered lines are flushed when the guard drops, so it lives as long as the process.
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    tracing::debug!("Logging to {:?}", dir.join(LOG_FILE_NAME));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir() {
        assert!(default_log_dir().ends_with("collectbox/logs"));
    }
}
