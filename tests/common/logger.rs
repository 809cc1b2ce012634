//! Test logging infrastructure for structured test output and debugging.
#![allow(dead_code)]
//!
//! Provides a `TestLogger` for structured logging during tests with support for:
//! - Log levels controlled by `TEST_LOG_LEVEL` env var
//! - JSON output mode for CI parsing
//! - Duration tracking per test
//! - Phase tracking (setup, test, teardown)
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::logger::TestLogger;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let log = TestLogger::new("test_example");
//!     log.phase("setup");
//!     // ... start mock servers ...
//!     log.phase("test");
//!     log.info("Calling research");
//!     log.finish_ok();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `TEST_LOG_LEVEL` - Set log level: trace, debug, info, warn, error (default: info)
//! - `TEST_LOG_FILE` - Also append plain lines to this file
//! - `TEST_LOG_JSON` - Set to "1" or "true" for JSON output format

use std::env;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Log Levels
// =============================================================================

/// Log severity levels matching standard conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string, case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Structured log entry for JSON output mode.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub test: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

// =============================================================================
// Global State
// =============================================================================

struct Settings {
    min_level: LogLevel,
    json: bool,
    file: Mutex<Option<File>>,
}

fn settings() -> &'static Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    SETTINGS.get_or_init(|| Settings {
        min_level: env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        json: env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        file: Mutex::new(
            env::var("TEST_LOG_FILE")
                .ok()
                .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok()),
        ),
    })
}

fn write_to_file(content: &str) {
    if let Ok(mut guard) = settings().file.lock()
        && let Some(ref mut file) = *guard
    {
        let _ = writeln!(file, "{content}");
    }
}

// =============================================================================
// TestLogger
// =============================================================================

/// Per-test logger with structured output and duration tracking.
pub struct TestLogger {
    test_name: String,
    start_time: Instant,
    current_phase: Mutex<String>,
}

impl TestLogger {
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            start_time: Instant::now(),
            current_phase: Mutex::new("init".to_string()),
        };
        logger.log(LogLevel::Info, "Test starting", None);
        logger
    }

    /// Set the current test phase.
    ///
    /// Common phases: "setup", "test", "teardown"
    pub fn phase(&self, phase: &str) {
        if let Ok(mut current) = self.current_phase.lock() {
            *current = phase.to_string();
        }
        self.log(LogLevel::Debug, &format!("Phase: {phase}"), None);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None);
    }

    /// Mark test as passed with duration.
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish_ok(&self) {
        let duration_ms = self.start_time.elapsed().as_millis() as u64;
        self.log(
            LogLevel::Info,
            &format!("Test passed (duration: {duration_ms}ms)"),
            Some(duration_ms),
        );
    }

    fn log(&self, level: LogLevel, message: &str, duration_ms: Option<u64>) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }

        let timestamp = Utc::now();
        let phase = self.current_phase.lock().ok().map(|p| p.clone());

        let line = if settings.json {
            let entry = LogEntry {
                timestamp,
                level,
                test: self.test_name.clone(),
                message: message.to_string(),
                phase,
                duration_ms,
            };
            match serde_json::to_string(&entry) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            let ts = timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ");
            format!("[{ts}] [{level}] [{}] {message}", self.test_name)
        };

        eprintln!("{line}");
        write_to_file(&line);
    }
}
