use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LOG_LEVELS, LoggingConfig};

/// Initialize tracing with both stdout and rolling file output.
/// File format: human-readable logfmt, or JSON when `json` is set.
///
/// Hold the returned guard until shutdown; dropping it stops the file writer.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard, ConfigError> {
    if !LOG_LEVELS.contains(&config.level.as_str()) {
        return Err(ConfigError::LogLevel(config.level.clone()));
    }

    // Log file = <dir>/keyhouse.log.{date}
    let file_appender = rolling::daily(&config.dir, "keyhouse.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // Console layer on stderr so stdout stays machine-readable
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    let file_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_current_span(false)
            .with_span_list(false)
            .with_level(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking_file)
            .with_target(false)
            .with_level(true)
            .with_ansi(false)
            .boxed()
    };

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
