use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quiescence interval: a root is "settled" once no changes have been
    /// observed for this long.
    pub settle_ms: u64,

    /// Default cookie-sync timeout applied to queries and state commands
    /// that do not supply their own.
    pub default_sync_timeout_ms: u64,

    /// Deleted entries older than this are eligible for age-out.
    pub age_out_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub publisher: PublisherLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_ms: 20,
            default_sync_timeout_ms: 60_000,
            age_out_secs: 0,
            logging: LoggingConfig::default(),
            publisher: PublisherLimits::default(),
        }
    }
}

impl Config {
    pub fn settle_period(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn default_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.default_sync_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    /// Directory for the rolling log file; defaults to the runtime dir.
    pub dir: Option<std::path::PathBuf>,
}

/// Bounds on the per-root unilateral publisher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherLimits {
    pub max_subscribers: usize,
    pub max_queue_events: usize,
}

impl Default for PublisherLimits {
    fn default() -> Self {
        Self {
            max_subscribers: 128,
            max_queue_events: 1024,
        }
    }
}
