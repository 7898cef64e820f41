//! Tracing setup for the daemon and CLI.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::paths;

const LOG_FILE_PREFIX: &str = "watchman.log";

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global subscriber. `verbosity` is the CLI `-v` count;
/// the `WATCHMAN_LOG` env var takes precedence when set.
pub fn init(verbosity: u8, logging: &LoggingConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("WATCHMAN_LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Pretty => layers.push(stderr_layer.pretty().boxed()),
        LogFormat::Compact => layers.push(stderr_layer.compact().boxed()),
        LogFormat::Json => layers.push(stderr_layer.json().boxed()),
    }

    if logging.file.enabled {
        let dir = logging
            .file
            .dir
            .clone()
            .unwrap_or_else(paths::runtime_dir);
        let _ = std::fs::create_dir_all(&dir);
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        );
    }

    layers.push(Box::new(filter));

    let _ = Registry::default().with(layers).try_init();

    TelemetryGuard { _guards: guards }
}

fn level_from_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
