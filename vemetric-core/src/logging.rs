//! Logging infrastructure for vemetric
//!
//! Logs go to a rolling file, by default `~/.local/state/vemetric/vemetric.log`,
//! so hosts that own stdout are not disturbed. The directory and rotation
//! come from [`LoggingConfig`].

use crate::config::{Config, LogRotation, LoggingConfig};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_NAME: &str = "vemetric.log";

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to the configured directory
/// - Rotation per [`LogRotation`]
/// - Level from `RUST_LOG`, falling back to the configured level
///
/// Embedding hosts that already installed a global subscriber keep it; the
/// returned guard is still valid but nothing is written to the file.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = log_dir(config);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(rotation(config.rotation), &log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_ok();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        rotation = ?config.rotation,
        installed,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Directory log files are written to
pub fn log_dir(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(Config::state_dir)
}

/// Path of the current log file, without the rotation suffix
pub fn log_file_path(config: &LoggingConfig) -> PathBuf {
    log_dir(config).join(LOG_FILE_NAME)
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_defaults_to_state_dir() {
        let path = log_file_path(&LoggingConfig::default());
        assert!(path.ends_with("vemetric/vemetric.log"));
    }

    #[test]
    fn test_log_dir_override() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/tmp/vemetric-logs")),
            ..Default::default()
        };
        assert_eq!(
            log_file_path(&config),
            PathBuf::from("/tmp/vemetric-logs/vemetric.log")
        );
    }

    #[test]
    fn test_init_writes_to_configured_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            directory: Some(dir.path().join("logs")),
            rotation: LogRotation::Never,
            ..Default::default()
        };
        let _guard = init(&config).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
