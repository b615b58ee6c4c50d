//! provides logging helpers

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Optional file sink for logs, in addition to stderr.
pub const LOG_PATH_ENV_VAR: &str = "VALIDATOR_LOG_PATH";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// Logs always go to stderr. When [`LOG_PATH_ENV_VAR`] names a file, a daily
/// rolling copy is written next to it; the returned guard must be held until
/// the process exits so buffered lines get flushed.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let file_appender = env::var(LOG_PATH_ENV_VAR)
        .ok()
        .and_then(|log_path| rolling_appender(Path::new(&log_path)));

    match file_appender {
        Some(appender) => {
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        None => {
            registry().with(stderr_layer).init();
            None
        }
    }
}

fn rolling_appender(log_path: &Path) -> Option<RollingFileAppender> {
    let dir = log_path.parent()?;
    let file = log_path.file_name()?.to_str()?;

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(3)
        .build(dir)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("failed to create log file appender at {}: {e}", log_path.display());
            None
        }
    }
}
