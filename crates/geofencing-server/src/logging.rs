//! Logging initialization and configuration.
//!
//! Production writes JSON to rolling files and compact lines to stdout;
//! development writes pretty lines with span events to stdout.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the production logging setup.
pub const ENVIRONMENT_ENV: &str = "GEOFENCING_ENV";

const LOG_FILE_PREFIX: &str = "geofencing";

/// Guards flushing the non-blocking writers; held for the whole process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system with environment-appropriate configuration.
///
/// # Arguments
///
/// * `is_production` - Whether to use production logging configuration
///
/// The level comes from `RUST_LOG` if set, otherwise from
/// `GEOFENCING_LOG_LEVEL` (default `info`).
///
/// # Production Mode
///
/// JSON to rolling daily files in `/var/log/geofencing/` plus compact,
/// uncoloured stdout for the systemd journal.
///
/// # Development Mode
///
/// Pretty stdout with span events.
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed or the log directory
/// cannot be created.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var("GEOFENCING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if is_production {
        init_production(env_filter)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// Returns `true` if `GEOFENCING_ENV` is `production` (case-insensitive).
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENVIRONMENT_ENV).is_ok_and(|value| is_production_value(&value))
}

fn is_production_value(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("production")
}

/// Initialize production logging with file + stdout output.
fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        anyhow::bail!("Cannot create log directory {}: {e}", log_dir.display());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // JSON in files, compact on stdout for journald
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    Ok(())
}

/// Initialize development logging with pretty stdout output.
fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Returns the appropriate log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/geofencing")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "geofencing")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_value() {
        assert!(is_production_value("production"));
        assert!(is_production_value(" Production\n"));
        assert!(!is_production_value("development"));
        assert!(!is_production_value(""));
    }

    #[test]
    fn test_log_directory_is_named_after_service() {
        let dir = log_directory();
        assert!(dir.to_string_lossy().contains("geofencing") || dir.ends_with("logs"));
    }
}
