//! HTTP client utilities.
//!
//! Provides the shared HTTP client for all provider clients and the mapping
//! from transport errors and HTTP statuses into [`PersonaError`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder, Response, StatusCode};

use crate::error::{PersonaError, QuotaType, Result};
use crate::util::truncate_for_display;

/// Default timeout for provider calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters of an error body kept in `ConnectionFailure` messages.
const ERROR_BODY_LIMIT: usize = 200;

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(format!("persona-core/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PersonaError::Config(format!("failed to build HTTP client: {e}")))
}

/// Map a reqwest send/read error into the taxonomy.
///
/// URLs are stripped and the source chain is flattened so the message keeps
/// the substrings recovery looks for (dns, certificate, timed out).
#[must_use]
pub fn map_transport_error(provider: &str, err: reqwest::Error, timeout: Duration) -> PersonaError {
    if err.is_timeout() {
        return PersonaError::Timeout {
            provider: provider.to_string(),
            seconds: timeout.as_secs(),
        };
    }

    let status = err.status().map(|s| s.as_u16());
    let err = err.without_url();
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    PersonaError::ConnectionFailure {
        provider: provider.to_string(),
        status,
        message,
    }
}

/// Pass successful responses through; classify everything else.
///
/// # Errors
///
/// - 429 → `RateLimited` (with `Retry-After` when present)
/// - 402 or an `insufficient_quota` body → `QuotaExceeded`
/// - 401/403 → `ConnectionFailure` without the body, which may echo key material
/// - anything else → `ConnectionFailure` with status and a truncated body
pub async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(PersonaError::ConnectionFailure {
            provider: provider.to_string(),
            status: Some(status.as_u16()),
            message: format!("authentication failed (HTTP {})", status.as_u16()),
        });
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::PAYMENT_REQUIRED || body.contains("insufficient_quota") {
        return Err(PersonaError::QuotaExceeded {
            quota_type: QuotaType::Provider,
            detail: format!("{provider} reported an exhausted quota (HTTP {})", status.as_u16()),
        });
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PersonaError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        });
    }

    let snippet = truncate_for_display(body.trim(), ERROR_BODY_LIMIT);
    let message = if snippet.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {snippet}", status.as_u16())
    };
    Err(PersonaError::ConnectionFailure {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        message,
    })
}

/// Parse a `Retry-After` header: delta-seconds (integer or fractional) or an
/// HTTP date relative to `now`.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>()
        && secs.is_finite()
        && secs >= 0.0
    {
        return Some(Duration::from_secs_f64(secs));
    }
    DateTime::parse_from_rfc2822(value).ok().map(|date| {
        date.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    })
}
