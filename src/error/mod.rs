//! Error types for persona-core.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Provider-facing failures fall into five kinds that drive retry and
//! recovery decisions:
//! - **ConnectionFailure**: transport errors and non-success HTTP statuses
//! - **RateLimited**: the provider asked us to back off (`retry_after`)
//! - **Timeout**: a provider call exceeded its explicit deadline
//! - **ValidationFailure** / **ParsingFailure**: the provider answered but the
//!   text is not a usable personality descriptor
//! - **QuotaExceeded**: a local cost threshold or a provider quota was hit
//!
//! Everything else (configuration, cache plumbing, I/O) is supporting.
//!
//! Each error has a stable error code (e.g., `PERS-N001`) for programmatic handling.
//!
//! ## Credentials
//!
//! No variant ever carries a credential. Provider clients strip URLs from
//! transport errors and send keys in headers, and raw provider text is
//! truncated before it is stored in an error.

pub mod suggestions;

use std::time::Duration;
use thiserror::Error;

pub use suggestions::FixSuggestion;

use crate::util::truncate_for_display;

/// Maximum number of characters of raw provider text kept inside an error.
pub const RAW_TEXT_LIMIT: usize = 500;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport issues (connection refused, DNS, TLS, HTTP status, timeout).
    Network,
    /// Provider-side throttling or quota issues.
    Provider,
    /// The provider answered with unusable content.
    Validation,
    /// Configuration issues (parse errors, invalid values).
    Configuration,
    /// Cache backend plumbing.
    Cache,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network error",
            Self::Provider => "Provider error",
            Self::Validation => "Validation error",
            Self::Configuration => "Configuration error",
            Self::Cache => "Cache error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Network => "N",
            Self::Provider => "P",
            Self::Validation => "V",
            Self::Configuration => "C",
            Self::Cache => "K",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes used by the `persona` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Research completed but produced no profiles
    NoProfiles = 2,
    /// Configuration or parse errors
    ConfigError = 3,
    /// Timeout
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Which cost or provider quota was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaType {
    /// Rolling one-hour spend limit.
    Hourly,
    /// Rolling 24-hour spend limit.
    Daily,
    /// Estimated cost of a single request.
    PerRequest,
    /// Quota reported by the provider itself (HTTP 402 / insufficient quota).
    Provider,
}

impl QuotaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::PerRequest => "per-request",
            Self::Provider => "provider",
        }
    }
}

impl std::fmt::Display for QuotaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for persona-core operations.
///
/// Each variant has:
/// - A stable error code (e.g., `PERS-N001`)
/// - A category for classification
/// - A retryable flag for the retry policy
#[derive(Error, Debug)]
pub enum PersonaError {
    // ==========================================================================
    // Provider call failures
    // ==========================================================================
    /// Transport failure or non-success HTTP status from a provider.
    #[error("connection to {provider} failed: {message}")]
    ConnectionFailure {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Rate limited by provider.
    #[error("rate limited by {provider}{}", retry_after_suffix(*.retry_after))]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// A provider call exceeded its explicit timeout.
    #[error("request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// The provider answered 2xx but the envelope could not be read.
    #[error("malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    // ==========================================================================
    // Descriptor failures
    // ==========================================================================
    /// No JSON-like span could be found or parsed in the provider text.
    #[error("could not parse structured data from provider response")]
    ParsingFailure { raw_text: String },

    /// Parsed data does not satisfy the descriptor schema.
    #[error("descriptor failed validation: {}", field_errors.join("; "))]
    ValidationFailure {
        raw_text: String,
        field_errors: Vec<String>,
    },

    // ==========================================================================
    // Governance
    // ==========================================================================
    /// A cost threshold or provider quota was exceeded.
    #[error("{quota_type} quota exceeded: {detail}")]
    QuotaExceeded { quota_type: QuotaType, detail: String },

    /// No configured provider could be tried.
    #[error("no provider available: {reason}")]
    NoAvailableProvider { reason: String },

    /// The caller cancelled the request.
    #[error("research request was cancelled")]
    Cancelled,

    // ==========================================================================
    // Configuration
    // ==========================================================================
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error parsing the configuration document.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Provider name not present in the registry.
    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    // ==========================================================================
    // Cache plumbing
    // ==========================================================================
    /// A cache backend could not be constructed.
    #[error("cache backend error: {0}")]
    Cache(String),

    // ==========================================================================
    // I/O and wrappers
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn retry_after_suffix(retry_after: Option<Duration>) -> String {
    retry_after.map_or_else(String::new, |d| {
        format!(" (retry after {}s)", d.as_secs())
    })
}

impl PersonaError {
    /// Build a `ParsingFailure`, truncating the raw text.
    #[must_use]
    pub fn parsing(raw_text: &str) -> Self {
        Self::ParsingFailure {
            raw_text: truncate_for_display(raw_text, RAW_TEXT_LIMIT),
        }
    }

    /// Build a `ValidationFailure`, truncating the raw text.
    #[must_use]
    pub fn validation(raw_text: &str, field_errors: Vec<String>) -> Self {
        Self::ValidationFailure {
            raw_text: truncate_for_display(raw_text, RAW_TEXT_LIMIT),
            field_errors,
        }
    }

    /// Map error to exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_)
            | Self::ConfigParse { .. }
            | Self::InvalidProvider(_)
            | Self::Cache(_) => ExitCode::ConfigError,

            Self::Timeout { .. } => ExitCode::Timeout,

            Self::ParsingFailure { .. }
            | Self::ValidationFailure { .. }
            | Self::NoAvailableProvider { .. } => ExitCode::NoProfiles,

            Self::ConnectionFailure { .. }
            | Self::RateLimited { .. }
            | Self::MalformedResponse { .. }
            | Self::QuotaExceeded { .. }
            | Self::Cancelled
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailure { .. } | Self::Timeout { .. } => ErrorCategory::Network,

            Self::RateLimited { .. }
            | Self::MalformedResponse { .. }
            | Self::QuotaExceeded { .. }
            | Self::NoAvailableProvider { .. } => ErrorCategory::Provider,

            Self::ParsingFailure { .. } | Self::ValidationFailure { .. } => {
                ErrorCategory::Validation
            }

            Self::Config(_) | Self::ConfigParse { .. } | Self::InvalidProvider(_) => {
                ErrorCategory::Configuration
            }

            Self::Cache(_) => ErrorCategory::Cache,

            Self::Cancelled | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `PERS-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailure { .. } => "PERS-N001",
            Self::Timeout { .. } => "PERS-N002",

            Self::RateLimited { .. } => "PERS-P001",
            Self::QuotaExceeded { .. } => "PERS-P002",
            Self::MalformedResponse { .. } => "PERS-P003",
            Self::NoAvailableProvider { .. } => "PERS-P010",

            Self::ParsingFailure { .. } => "PERS-V001",
            Self::ValidationFailure { .. } => "PERS-V002",

            Self::Config(_) => "PERS-C001",
            Self::ConfigParse { .. } => "PERS-C002",
            Self::InvalidProvider(_) => "PERS-C010",

            Self::Cache(_) => "PERS-K001",

            Self::Cancelled => "PERS-X010",
            Self::Io(_) => "PERS-X001",
            Self::Json(_) => "PERS-X002",
            Self::Other(_) => "PERS-X099",
        }
    }

    /// Returns whether the error is potentially recoverable by retrying the
    /// same provider call.
    ///
    /// Client errors (401, 403, 404, ...) are not retried; neither are
    /// validation failures, which go through repair instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::ConnectionFailure { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            _ => false,
        }
    }

    /// Whether this error counts as a rate limit for health tracking.
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns the retry-after duration if this error specifies one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the provider name if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailure { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::MalformedResponse { provider, .. } => Some(provider),
            Self::InvalidProvider(p) => Some(p),
            _ => None,
        }
    }

    /// One-line rendering used in research results: `[CODE] message`.
    #[must_use]
    pub fn to_report_line(&self) -> String {
        format!("[{}] {}", self.error_code(), self)
    }

    /// Returns actionable fix suggestions for this error.
    #[must_use]
    pub fn fix_suggestions(&self) -> Vec<FixSuggestion> {
        match self {
            Self::ConnectionFailure {
                provider,
                status,
                message,
            } => suggestions::connection_failure_suggestions(provider, *status, message),
            Self::RateLimited {
                provider,
                retry_after,
            } => suggestions::rate_limited_suggestions(provider, *retry_after),
            Self::Timeout { provider, seconds } => {
                suggestions::timeout_suggestions(provider, *seconds)
            }
            Self::MalformedResponse { provider, message } => {
                vec![FixSuggestion::new(
                    vec!["persona providers".to_string()],
                    format!(
                        "{provider} returned a response in an unexpected shape: {message}. \
                         The provider API may have changed or the base URL points at a \
                         different service."
                    ),
                )]
            }
            Self::ParsingFailure { .. } => suggestions::parsing_failure_suggestions(),
            Self::ValidationFailure { field_errors, .. } => {
                suggestions::validation_failure_suggestions(field_errors)
            }
            Self::QuotaExceeded { quota_type, detail } => {
                suggestions::quota_exceeded_suggestions(*quota_type, detail)
            }
            Self::NoAvailableProvider { reason } => {
                suggestions::no_available_provider_suggestions(reason)
            }
            Self::Cancelled => vec![FixSuggestion::new(
                Vec::new(),
                "The request was cancelled before it completed. No result was cached.",
            )],
            Self::Config(msg) => vec![FixSuggestion::new(
                vec!["persona config".to_string()],
                format!("Configuration error: {msg}"),
            )],
            Self::ConfigParse { path, message } => {
                suggestions::config_parse_suggestions(path, message)
            }
            Self::InvalidProvider(name) => suggestions::invalid_provider_suggestions(name),
            Self::Cache(msg) => vec![FixSuggestion::new(
                vec!["persona config".to_string()],
                format!(
                    "The cache backend could not be initialised: {msg}. Research still \
                     works without a cache."
                ),
            )],
            Self::Io(err) => vec![FixSuggestion::new(
                vec!["# Check file permissions and disk space".to_string()],
                format!("I/O error: {err}. Check file permissions and available disk space."),
            )],
            Self::Json(err) => vec![FixSuggestion::new(
                Vec::new(),
                format!("JSON error: {err}. The data may be corrupted."),
            )],
            Self::Other(err) => vec![FixSuggestion::new(
                Vec::new(),
                format!("Unexpected error: {err}. Please report this issue."),
            )],
        }
    }
}

/// Result type alias for persona-core operations.
pub type Result<T> = std::result::Result<T, PersonaError>;

// =============================================================================
// Tests
// =============================================================================
