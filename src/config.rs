/*!
 * Configuration types for the relay
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Main configuration for a relay run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum bytes moved by a single transfer call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum bytes ingested from the input per relay cycle
    #[serde(default = "default_ingest_budget")]
    pub ingest_budget: u64,

    /// Use zero-copy system calls when available
    #[serde(default = "default_true")]
    pub use_zero_copy: bool,

    /// Sleep between cycles that moved no data, in milliseconds
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Directory for the spool file (None = system temp dir)
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,

    /// Release spool blocks every output has already consumed
    #[serde(default)]
    pub reclaim: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            ingest_budget: default_ingest_budget(),
            use_zero_copy: true,
            idle_backoff_ms: default_idle_backoff_ms(),
            spool_dir: None,
            reclaim: false,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KB, one default pipe buffer
}

fn default_ingest_budget() -> u64 {
    16 * default_chunk_size() as u64
}

fn default_idle_backoff_ms() -> u64 {
    5
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RelayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("TOML serialize error: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            RelayError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Reject settings the relay loop cannot make progress with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RelayError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.ingest_budget < self.chunk_size as u64 {
            return Err(RelayError::Config(format!(
                "ingest_budget ({}) must be at least one chunk ({})",
                self.ingest_budget, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}
