//! Structured logging for the fee engine
//!
//! Call sites use the `log` facade directly for one-off messages. Events
//! worth correlating (selection outcomes, provider failures, breaker
//! transitions) go through the context helpers below, which tag the
//! record with a [`LogContext`] and sanitize identifiers such as
//! addresses and txids before they reach the sink.
//!
//! # Usage
//!
//! ```
//! use bitvault_fees::logging::{self, LogConfig, LogLevel};
//! use serde_json::json;
//!
//! logging::init(&LogConfig::default()).expect("Failed to initialize logging");
//!
//! logging::log_fees(
//!     LogLevel::Info,
//!     "provider answered",
//!     Some(json!({ "provider": "mempool", "recommended": 12 })),
//! );
//! ```

use chrono::Local;
use log::{debug, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::sync::Once;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Which part of the engine emitted an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogContext {
    /// Transaction size estimation
    Sizing,
    /// UTXO selection tiers and outcomes
    Selection,
    /// Fee providers and the provider chain
    FeeProvider,
    /// Circuit breaker state changes
    CircuitBreaker,
    /// Multi-phase estimation requests
    Estimation,
}

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level
    #[serde(default = "default_level")]
    pub level: LogLevel,
    /// Path to log file (None for console-only)
    #[serde(default)]
    pub log_file: Option<String>,
    /// Whether to include timestamps in log messages
    #[serde(default = "default_true")]
    pub include_timestamps: bool,
    /// Whether to include source location in log messages
    #[serde(default)]
    pub include_source_location: bool,
    /// Whether to use JSON format for logs (machine-readable)
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_file: None,
            include_timestamps: true,
            include_source_location: false,
            json_format: false,
        }
    }
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

static LOGGING_INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Only the first call installs a logger; later calls return `Ok(())`.
/// If another logger was installed first (common in test binaries) it is
/// left in place. When the log file cannot be opened the logger still
/// writes to stderr and the open error is returned.
pub fn init(config: &LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    LOGGING_INIT.call_once(|| {
        let (mut builder, opened) = build_logger(config);
        if let Err(e) = builder.try_init() {
            debug!("Logger already initialized, keeping existing instance: {}", e);
        }
        if let Err(e) = &opened {
            warn!("{}; logging to stderr instead", e);
        }
        result = opened;
    });

    result
}

fn build_logger(config: &LogConfig) -> (env_logger::Builder, Result<(), String>) {
    let include_timestamps = config.include_timestamps;
    let include_source_location = config.include_source_location;
    let json_format = config.json_format;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.level.into());
    // RUST_LOG still wins for ad-hoc debugging
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.format(move |buf, record| {
        let timestamp = if include_timestamps {
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        } else {
            String::new()
        };

        let location = if include_source_location {
            format!(
                " [{}:{}]",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0)
            )
        } else {
            String::new()
        };

        if json_format {
            let line = json!({
                "timestamp": timestamp,
                "level": record.level().to_string(),
                "target": record.target(),
                "location": location.trim(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        } else {
            let mut style = buf.style();
            style.set_bold(true);
            if include_timestamps {
                write!(buf, "{} ", timestamp)?;
            }
            writeln!(
                buf,
                "[{}{}] {}",
                style.value(record.level()),
                location,
                record.args()
            )
        }
    });

    let mut opened = Ok(());
    if let Some(path) = &config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => opened = Err(format!("Failed to open log file {}: {}", path, e)),
        }
    }

    (builder, opened)
}

/// Update the log level dynamically
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.into());
}

/// Shorten an identifier (address, txid) for logging
///
/// Keeps the first and last four characters of anything longer than
/// eight characters; shorter values are masked completely.
pub fn sanitize_for_logging(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "*****".to_string();
    }

    let first: String = chars[..4].iter().collect();
    let last: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", first, last)
}

/// Build a JSON params object, sanitizing each value
pub fn sanitized_params(params: Vec<(&str, &str)>) -> serde_json::Value {
    let map = params
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!(sanitize_for_logging(value))))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

fn log_with_context(
    level: LogLevel,
    context: LogContext,
    message: &str,
    params: Option<serde_json::Value>,
) {
    match params {
        Some(params) => log::log!(level.into(), "[{:?}] {} {}", context, message, params),
        None => log::log!(level.into(), "[{:?}] {}", context, message),
    }
}

/// Log a size estimation event
pub fn log_sizing(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Sizing, message, params);
}

/// Log a UTXO selection event
pub fn log_selection(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Selection, message, params);
}

/// Log a fee provider event
pub fn log_fees(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::FeeProvider, message, params);
}

/// Log a circuit breaker event
pub fn log_breaker(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::CircuitBreaker, message, params);
}

/// Log an estimation pipeline event
pub fn log_estimation(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Estimation, message, params);
}
