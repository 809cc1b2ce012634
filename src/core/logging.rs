//! Tracing subscriber setup for the `persona` binary.
//!
//! The library only emits events; installing a subscriber is the caller's
//! job. `RUST_LOG` directives win over everything; otherwise the level from
//! the CLI or `PERSONA_LOG` applies to this crate only.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "PERSONA_LOG";
pub const LOG_FORMAT_ENV: &str = "PERSONA_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "PERSONA_LOG_FILE";

/// Crate target used in the default filter.
const CRATE_TARGET: &str = "persona_core";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log level from CLI argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from CLI argument.
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to tracing filter string.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Level from `PERSONA_LOG`, via `lookup`.
#[must_use]
pub fn log_level_from<F: Fn(&str) -> Option<String>>(lookup: F) -> Option<LogLevel> {
    non_empty(lookup(LOG_LEVEL_ENV)).and_then(|v| LogLevel::from_arg(&v))
}

/// Format from `PERSONA_LOG_FORMAT`, via `lookup`.
#[must_use]
pub fn log_format_from<F: Fn(&str) -> Option<String>>(lookup: F) -> Option<LogFormat> {
    non_empty(lookup(LOG_FORMAT_ENV)).and_then(|v| LogFormat::from_arg(&v))
}

/// Destination file from `PERSONA_LOG_FILE`, via `lookup`.
#[must_use]
pub fn log_file_from<F: Fn(&str) -> Option<String>>(lookup: F) -> Option<PathBuf> {
    non_empty(lookup(LOG_FILE_ENV)).map(PathBuf::from)
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolve CLI settings against the environment: CLI flags win, then env,
/// then defaults. `verbose` lifts the default level to debug.
#[must_use]
pub fn resolve(
    level: Option<LogLevel>,
    format: Option<LogFormat>,
    log_file: Option<PathBuf>,
    verbose: bool,
) -> (LogLevel, LogFormat, Option<PathBuf>) {
    let level = level
        .or_else(|| log_level_from(process_env))
        .unwrap_or(if verbose { LogLevel::Debug } else { LogLevel::default() });
    let format = format
        .or_else(|| log_format_from(process_env))
        .unwrap_or_default();
    let file = log_file.or_else(|| log_file_from(process_env));
    (level, format, file)
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(level: LogLevel, format: LogFormat, log_file: Option<PathBuf>) {
    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
    });

    let make_writer = || -> BoxMakeWriter {
        match file.as_ref().and_then(|f| f.try_clone().ok()) {
            Some(file) => BoxMakeWriter::new(file),
            None => BoxMakeWriter::new(std::io::stderr),
        }
    };

    let make_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{CRATE_TARGET}={}", level.as_filter())))
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .json()
                .with_writer(make_writer())
                .with_span_events(FmtSpan::CLOSE)
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .compact()
                .with_writer(make_writer())
                .with_target(true)
                .try_init()
                .ok();
        }
        LogFormat::Human => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .with_writer(make_writer())
                .with_target(false)
                .without_time()
                .try_init()
                .ok();
        }
    }
}
