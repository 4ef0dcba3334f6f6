//! Centralized file-based logging system
//!
//! Writes logs to files under a log directory, separated by log type:
//! - main/ - all events, JSON
//! - error/ - warnings and errors only
//! - ws/ - connection, session and keepalive events
//! - server/ - listener events
//!
//! Level filtering follows `RUST_LOG`, defaulting to `info`.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 4] = ["main", "error", "ws", "server"];

/// Initialize file and console logging under `logs_dir`
///
/// Returns the appender guards, which must be kept alive for the duration of
/// the program. Fails if the directories cannot be created or a global
/// subscriber is already installed.
pub fn init_logging(logs_dir: impl AsRef<Path>) -> io::Result<Vec<WorkerGuard>> {
    let logs_dir = logs_dir.as_ref();
    for log_type in LOG_TYPES {
        fs::create_dir_all(logs_dir.join(log_type))?;
    }

    let mut guards = Vec::with_capacity(LOG_TYPES.len());

    let (main_appender, guard) = create_appender(logs_dir, "main");
    guards.push(guard);
    let (error_appender, guard) = create_appender(logs_dir, "error");
    guards.push(guard);
    let (ws_appender, guard) = create_appender(logs_dir, "ws");
    guards.push(guard);
    let (server_appender, guard) = create_appender(logs_dir, "server");
    guards.push(guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let ws_layer = tracing_subscriber::fmt::layer()
        .with_writer(ws_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            is_ws_target(metadata.target())
        }));

    let server_layer = tracing_subscriber::fmt::layer()
        .with_writer(server_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            is_server_target(metadata.target())
        }));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(ws_layer)
        .with(server_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    tracing::info!("Logging initialized, files in {}", logs_dir.display());

    Ok(guards)
}

fn is_ws_target(target: &str) -> bool {
    target == "ws" || target.starts_with("wslink::ws")
}

fn is_server_target(target: &str) -> bool {
    target == "server" || target.starts_with("wslink::server")
}

/// Create a daily rolling file appender in `logs_dir/name`
fn create_appender(logs_dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, logs_dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_ws {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "ws", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_server {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "server", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_main {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "main", $level, $($arg)+)
    };
}
