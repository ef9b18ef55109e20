//! # Logging Utilities
//!
//! Logging infrastructure for vidlib using `tracing`.
//!
//! `vidlib-core` only emits events; this module installs the subscriber that
//! prints them. Supported:
//! - Pretty output for development, JSON for collection
//! - Filtering through `RUST_LOG`
//! - Console output (stderr, so command output on stdout stays clean) and an
//!   optional rolling log file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vidlib_utils::init_logging;
//!
//! // Keep the guard alive until exit or file output may be lost
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Symbol database tool started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=vidlib_core=trace`)
//! - `VIDLIB_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `VIDLIB_LOG_FILE`: Optional log file; rotated daily

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Keeps the background file writer running.
///
/// Dropping it flushes and stops file output; console output is unaffected.
#[derive(Debug, Default)]
#[must_use = "file logging stops when the guard is dropped"]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
}

impl LoggingGuard
{
    /// Whether a log file is being written.
    pub fn has_file(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `vidlib_core=debug`)
/// - `VIDLIB_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `VIDLIB_LOG_FILE`: Optional path to log file
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = env::var("VIDLIB_LOG_FORMAT")
        .ok()
        .and_then(|s| LogFormat::from_str(&s).ok())
        .unwrap_or_default();

    // RUST_LOG may be a plain level or a full directive list
    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LogLevel>().ok())
        .unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(default_level.into()));
    let log_file = env::var("VIDLIB_LOG_FILE").ok().map(PathBuf::from);
    install(format, &env_filter, log_file.as_deref())
}

/// Initialize logging with explicit level and format
///
/// `RUST_LOG` is ignored; `VIDLIB_LOG_FILE` is still honored.
///
/// ## Example
///
/// ```rust,no_run
/// use vidlib_utils::{init_logging_with_level, LogFormat, LogLevel};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let log_file = env::var("VIDLIB_LOG_FILE").ok().map(PathBuf::from);
    install(format, &level_filter(level.into()), log_file.as_deref())
}

/// Initialize file-only logging (no console output)
///
/// Logs go to `<dir>/YYYY-MM-DD-vidlib.log`, where `dir` defaults to
/// `~/.vidlib` (or the system temp directory without a home). Used when
/// console output would mix with data the process prints.
///
/// ## Errors
///
/// Returns an error if the directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging_to_file(level: Option<LogLevel>, dir: Option<PathBuf>) -> Result<(PathBuf, LoggingGuard), LoggingError>
{
    let dir = dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&dir)?;
    let today = Utc::now().format("%Y-%m-%d");
    let log_file = dir.join(format!("{today}-vidlib.log"));

    let env_filter = match level {
        Some(level) => level_filter(level.into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(Level::INFO)),
    };

    // Date is already in the file name, so no rotation
    let appender = tracing_appender::rolling::never(&dir, log_file.file_name().unwrap_or_default());
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = file_layer(LogFormat::Pretty, writer, env_filter);

    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok((log_file, LoggingGuard { file: Some(guard) }))
}

fn default_log_dir() -> PathBuf
{
    env::var("HOME")
        .map(|home| PathBuf::from(home).join(".vidlib"))
        .unwrap_or_else(|_| env::temp_dir())
}

fn level_filter(level: Level) -> EnvFilter
{
    EnvFilter::new(level.to_string())
}

fn install(format: LogFormat, env_filter: &EnvFilter, log_file: Option<&Path>) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(format, env_filter.clone())];
    let mut guard = LoggingGuard::default();

    if let Some(path) = log_file {
        let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let appender = tracing_appender::rolling::daily(dir, path.file_name().unwrap_or_default());
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(file_layer(format, writer, env_filter.clone()));
        guard.file = Some(file_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok(guard)
}

fn console_layer(format: LogFormat, env_filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(env_filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, writer: tracing_appender::non_blocking::NonBlocking, env_filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => layer.with_ansi(false).with_filter(env_filter).boxed(), // No ANSI in files
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("vidlib_core=debug"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::default()), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_second_initialization_fails()
    {
        let dir = env::temp_dir().join(format!("vidlib-logging-{}", std::process::id()));
        // only one global subscriber per process
        let first = init_logging_to_file(Some(LogLevel::Debug), Some(dir.clone()));
        let (path, guard) = first.unwrap();
        assert!(path.starts_with(&dir));
        assert!(guard.has_file());

        let second = init_logging_with_level(LogLevel::Info, LogFormat::Json);
        assert!(matches!(second, Err(LoggingError::InitializationFailed(_))));
        drop(guard);
        let _ = std::fs::remove_dir_all(dir);
    }
}
