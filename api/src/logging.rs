use crate::config::LoggingConfig;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber: console output plus, if a log directory
/// is configured, daily rolling files
///
/// `RUST_LOG` takes precedence over the configured filter. The returned
/// guard flushes the file writer and must be kept alive.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER)))?;

    // Local offset detection fails in some environments
    let timer = OffsetTime::local_rfc_3339().unwrap_or_else(|_| OffsetTime::new(time::UtcOffset::UTC, Rfc3339));

    let (file_layer, guard) = match &config.directory {
        Some(logs_dir) => {
            std::fs::create_dir_all(logs_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("relay-core")
                .filename_suffix("log")
                .build(logs_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_timer(timer.clone())
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().with_timer(timer).with_target(false))
        .with(filter)
        .try_init()?;

    tracing::info!("Logging system initialized");
    if let Some(logs_dir) = &config.directory {
        tracing::info!("Log files are being written to: {:?}", logs_dir);
    }

    Ok(guard)
}

pub fn log_shutdown() {
    tracing::info!("Relay core shutting down");
}
