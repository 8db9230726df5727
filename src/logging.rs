use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_DIR: &str = "./logs";
const LOG_FILE_PREFIX: &str = "nse-orb-scanner.log";

/// Console plus daily-rotated JSON file under [`LOG_DIR`].
/// Level comes from `RUST_LOG`, default `info`.
pub fn init_logging() -> Result<()> {
    init_logging_in(LOG_DIR)
}

pub fn init_logging_in(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);

    tracing_subscriber::registry()
        .with(
            // Console output
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(true),
        )
        .with(
            // File output with JSON formatting
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false)
                .json(),
        )
        // RUST_LOG, default info
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .context("Global tracing subscriber already installed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn test_logging() {
        let dir = tempfile::TempDir::new().unwrap();
        init_logging_in(dir.path()).unwrap();

        info!(symbol = "RELIANCE", "info message");
        warn!("warning message");

        assert!(dir.path().exists());
        // second install is refused
        assert!(init_logging_in(dir.path()).is_err());
    }
}
