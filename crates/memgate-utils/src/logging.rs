//! # Logging Utilities
//!
//! Logging setup for memgate using `tracing`.
//!
//! Two modes:
//! - **Command mode** ([`init_logging`], [`init_logging_with_level`]): events
//!   go to stderr, so stdout stays clean for hexdumps and values. Events can
//!   also be mirrored into a daily-rolled file.
//! - **Interactive mode** ([`init_logging_for_interactive`]): events go only
//!   to a dated file, so they never interleave with prompts.
//!
//! Every initializer returns a [`LogGuard`]. Keep it alive until exit or
//! buffered file output is lost.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `debug`, `memgate_core=trace`)
//! - `MEMGATE_LOG_FORMAT`: `pretty` (default) or `json`
//! - `MEMGATE_LOG_FILE`: optional file to mirror command-mode output into
//!
//! ## Example
//!
//! ```rust,no_run
//! use memgate_utils::init_logging;
//!
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("memgate started");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::{NaiveDate, Utc};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
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
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" | "dev" => Ok(LogFormat::Pretty),
            "json" | "prod" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
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
        match s.trim().to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer alive
///
/// Dropping it flushes and stops the writer thread.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

/// Resolved logging options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogSettings
{
    /// Overrides `RUST_LOG` when set
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Extra file sink in command mode
    pub file: Option<PathBuf>,
}

impl LogSettings
{
    /// Settings from `MEMGATE_LOG_FORMAT` and `MEMGATE_LOG_FILE`
    ///
    /// An unknown format falls back to pretty output.
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            level: None,
            format: lookup("MEMGATE_LOG_FORMAT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            file: lookup("MEMGATE_LOG_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Command-mode logging configured from the environment
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    init_with_settings(&LogSettings::from_env())
}

/// Command-mode logging with an explicit level and format
///
/// `MEMGATE_LOG_FILE` is still honored.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    let settings = LogSettings {
        level: Some(level),
        format,
        ..LogSettings::from_env()
    };
    init_with_settings(&settings)
}

/// Command-mode logging from resolved settings
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_with_settings(settings: &LogSettings) -> Result<LogGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![format_layer(settings.format, io::stderr, true)];
    let mut file_worker = None;

    if let Some(path) = &settings.file {
        let (directory, file_name) = split_log_path(path);
        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(format_layer(settings.format, writer, false));
        file_worker = Some(worker);
    }

    Registry::default()
        .with(layers)
        .with(build_filter(settings.level))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(LogGuard { _file: file_worker })
}

/// File-only logging for the interactive inspector
///
/// Writes to `~/.memgate/YYYY-MM-DD-memgate.log`, or the same name under
/// `/tmp` when `HOME` is unset. Returns the path so it can be shown to the
/// operator.
///
/// ## Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging_for_interactive(level: Option<LogLevel>) -> Result<(PathBuf, LogGuard), LoggingError>
{
    let home = env::var_os("HOME").map(PathBuf::from);
    let log_file = interactive_log_path(home.as_deref(), Utc::now().date_naive());
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let format = LogSettings::from_env().format;
    let (directory, file_name) = split_log_path(&log_file);
    // The date is already in the file name.
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    Registry::default()
        .with(vec![format_layer(format, writer, false)])
        .with(build_filter(level))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok((log_file, LogGuard { _file: Some(worker) }))
}

/// Where interactive mode writes its log for a given day
pub fn interactive_log_path(home: Option<&Path>, today: NaiveDate) -> PathBuf
{
    let name = format!("{}-memgate.log", today.format("%Y-%m-%d"));
    match home {
        Some(home) => home.join(".memgate").join(name),
        None => PathBuf::from("/tmp").join(name),
    }
}

/// An explicit level wins over `RUST_LOG`; `info` if neither is usable
fn build_filter(level: Option<LogLevel>) -> EnvFilter
{
    match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf)
{
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .map_or_else(|| PathBuf::from("memgate.log"), PathBuf::from);
    (directory, file_name)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0} (use 'pretty' or 'json')")]
    InvalidFormat(String),

    #[error("Invalid log level: {0} (use 'error', 'warn', 'info', 'debug' or 'trace')")]
    InvalidLevel(String),

    /// A global subscriber was already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
