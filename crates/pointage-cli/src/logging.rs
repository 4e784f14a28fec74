//! Logging initialization.
//!
//! The terminal belongs to the operator, so logs never go to stdout:
//! - **Default**: JSON logs to a rolling daily file, warnings also on stderr
//! - **Verbose**: pretty logs to stderr with span events, plus the file

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the default filter directive.
pub const LOG_LEVEL_VAR: &str = "POINTAGE_LOG_LEVEL";

/// Keeps the non-blocking file writer alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging.
///
/// `RUST_LOG` wins over [`LOG_LEVEL_VAR`], which wins over the built-in
/// level (`debug` when verbose, `info` otherwise).
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let log_level = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| default_level.to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let log_dir = log_directory(log_dir);
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "pointage");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let stderr_layer = if verbose {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(LevelFilter::WARN)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    Ok(())
}

/// Directory for log files: `<data dir>/logs`.
fn log_directory(data_dir: Option<&Path>) -> PathBuf {
    data_dir.map_or_else(
        || {
            directories::ProjectDirs::from("", "", "pointage")
                .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
        },
        |dir| dir.join("logs"),
    )
}
