/*!
 * Logging and tracing initialization
 *
 * Stdout may itself be a relay output, so nothing here ever writes to it:
 * human-readable lines go to stderr, or JSON lines go to the configured file.
 */

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Where log events end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    JsonFile(PathBuf),
}

impl LogSink {
    pub fn from_config(config: &RelayConfig) -> Self {
        match config.log_file {
            Some(ref path) => LogSink::JsonFile(path.clone()),
            None => LogSink::Stderr,
        }
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn init_logging(config: &RelayConfig) -> Result<()> {
    let filter = build_filter(effective_level(config))?;

    let (stderr_layer, file_layer) = match LogSink::from_config(config) {
        LogSink::Stderr => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.verbose)
                .with_span_events(FmtSpan::NONE)
                .compact();
            (Some(layer), None)
        }
        LogSink::JsonFile(path) => {
            let file = open_log_file(&path)?;
            let layer = fmt::layer()
                .with_writer(file)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(false)
                .json();
            (None, Some(layer))
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| RelayError::Config(format!("Logging already initialized: {}", e)))
}

/// `RUST_LOG` wins; otherwise only this crate logs, at `level`
fn build_filter(level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("eager={}", level)))
        .map_err(|e| RelayError::Config(format!("Invalid log filter: {}", e)))
}

fn effective_level(config: &RelayConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Appends, so several runs can share one log
fn open_log_file(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RelayError::Config(format!("Cannot open log file {}: {}", path.display(), e)))
}

#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eager=debug"));
        let layer = fmt::layer().with_test_writer().without_time().compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::tempdir;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = RelayConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_configured_level_used() {
        let config = RelayConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_sink_selection() {
        assert_eq!(LogSink::from_config(&RelayConfig::default()), LogSink::Stderr);

        let config = RelayConfig {
            log_file: Some(PathBuf::from("/tmp/eager.log")),
            ..Default::default()
        };
        assert_eq!(
            LogSink::from_config(&config),
            LogSink::JsonFile(PathBuf::from("/tmp/eager.log"))
        );
    }

    #[test]
    fn test_log_file_opened_for_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.log");
        std::fs::write(&path, b"previous run\n").unwrap();

        drop(open_log_file(&path).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"previous run\n");

        let missing = dir.path().join("no/such/dir/relay.log");
        assert!(matches!(open_log_file(&missing), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_filter_builds_for_every_level() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            assert!(build_filter(level).is_ok());
        }
    }
}
