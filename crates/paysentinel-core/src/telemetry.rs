//! Logging and self-monitoring setup

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

const LOG_FILE_NAME: &str = "paysentinel.log";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level; `verbose` forces
/// `debug`. When a log directory is configured, JSON lines are also written to
/// a daily-rolling file and the returned guard must be held until exit.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if is_json(&config.format) {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = non_blocking(rolling::daily(dir, LOG_FILE_NAME));
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::config(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}

/// Install the global Prometheus recorder backing the `metrics` macros
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("failed to install metrics recorder: {e}")))
}

fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selection() {
        assert!(is_json("json"));
        assert!(is_json("JSON"));
        assert!(!is_json("pretty"));
        assert!(!is_json(""));
    }
}
