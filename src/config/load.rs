use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use super::Config;
use crate::paths;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

pub fn load() -> Result<Config, ConfigError> {
    let path = config_path();
    let mut config = if path.exists() {
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load the config, falling back to defaults (with env overrides) on error.
pub fn load_or_default() -> Config {
    match load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("config load failed, using defaults: {err}");
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            config
        }
    }
}

/// Environment variables win over the config file.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(ms) = env_u64("WATCHMAN_SETTLE_MS") {
        config.settle_ms = ms;
    }
    if let Some(ms) = env_u64("WATCHMAN_SYNC_TIMEOUT_MS") {
        config.default_sync_timeout_ms = ms;
    }
    if let Some(secs) = env_u64("WATCHMAN_AGE_OUT_SECS") {
        config.age_out_secs = secs;
    }
    if std::env::var_os("WATCHMAN_LOG_FILE").is_some() {
        config.logging.file.enabled = true;
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}
