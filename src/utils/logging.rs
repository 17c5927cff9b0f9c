//! Logging
//!
//! Installs the global tracing subscriber for the host binary: stderr plus a
//! non-blocking file appender under ~/.companion/logs/.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::ensure_log_dir;

const DEFAULT_FILTER: &str = "info";
const LOG_FILE: &str = "companion.log";

/// Keeps the file writer alive; drop it only at process exit.
pub struct LoggingHandle {
    pub guard: WorkerGuard,
}

/// Log output format, chosen with `COMPANION_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

fn build_filter(value: Option<String>) -> EnvFilter {
    value
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging into the default log directory.
pub fn init_logging() -> AppResult<LoggingHandle> {
    let log_dir = ensure_log_dir()?;
    init_logging_in(&log_dir)
}

/// Initialize logging into `log_dir`.
pub fn init_logging_in(log_dir: &Path) -> AppResult<LoggingHandle> {
    let filter = build_filter(std::env::var("COMPANION_LOG").ok());
    let format = LogFormat::from_env_value(std::env::var("COMPANION_LOG_FORMAT").ok().as_deref());

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init(),
    };
    result.map_err(|e| AppError::internal(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(
        component = "logging",
        log_path = %log_dir.join(LOG_FILE).display(),
        format = ?format,
        "logging initialized"
    );

    Ok(LoggingHandle { guard })
}
