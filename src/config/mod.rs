//! Daemon configuration: schema, file loading, env overrides.

mod load;
mod schema;

pub use load::{ConfigError, apply_env_overrides, config_path, load, load_or_default};
pub use schema::{Config, FileLoggingConfig, LogFormat, LoggingConfig, PublisherLimits};
