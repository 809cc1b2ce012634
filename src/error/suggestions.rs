//! Fix suggestion database for persona-core errors.
//!
//! Provides actionable fix suggestions mapped to specific error types,
//! including commands, context explanations, and prevention tips.

use std::time::Duration;

use super::QuotaType;

// =============================================================================
// Fix Suggestion Types
// =============================================================================

/// A fix suggestion for an error.
///
/// Contains actionable information to help users resolve errors.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FixSuggestion {
    /// Primary fix commands in order of preference.
    /// These should be copy-paste ready for the terminal.
    pub commands: Vec<String>,

    /// Explanation of why this error occurred.
    pub context: String,

    /// Tips to prevent this error in the future.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prevention: Option<String>,

    /// Link to documentation for more information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,
}

impl FixSuggestion {
    /// Creates a new fix suggestion with required fields.
    #[must_use]
    pub fn new(commands: Vec<String>, context: impl Into<String>) -> Self {
        Self {
            commands,
            context: context.into(),
            prevention: None,
            doc_url: None,
        }
    }

    /// Builder: adds prevention tips.
    #[must_use]
    pub fn with_prevention(mut self, prevention: impl Into<String>) -> Self {
        self.prevention = Some(prevention.into());
        self
    }

    /// Builder: adds documentation URL.
    #[must_use]
    pub fn with_doc_url(mut self, url: impl Into<String>) -> Self {
        self.doc_url = Some(url.into());
        self
    }
}

// =============================================================================
// Provider Documentation
// =============================================================================

/// Returns the API-key documentation page for a provider family.
#[must_use]
pub fn api_key_doc_for_provider(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    if lower.contains("openai") {
        Some("https://platform.openai.com/api-keys".to_string())
    } else if lower.contains("anthropic") || lower.contains("claude") {
        Some("https://console.anthropic.com/settings/keys".to_string())
    } else if lower.contains("gemini") || lower.contains("google") {
        Some("https://aistudio.google.com/app/apikey".to_string())
    } else if lower.contains("openrouter") {
        Some("https://openrouter.ai/keys".to_string())
    } else {
        None
    }
}

// =============================================================================
// Suggestion Generators
// =============================================================================

/// Generates fix suggestions for a failed provider connection.
///
/// The message is bucketed by well-known substrings so the advice matches
/// the underlying cause.
#[must_use]
pub fn connection_failure_suggestions(
    provider: &str,
    status: Option<u16>,
    message: &str,
) -> Vec<FixSuggestion> {
    let lower = message.to_lowercase();

    if matches!(status, Some(401 | 403)) || lower.contains("authentication") {
        return auth_failed_suggestions(provider);
    }
    if lower.contains("dns") || lower.contains("resolve") {
        return dns_failure_suggestions(provider);
    }
    if lower.contains("certificate") || lower.contains("ssl") || lower.contains("tls") {
        return ssl_error_suggestions(message);
    }

    let status_info = status.map_or(String::new(), |c| format!(" (HTTP {c})"));
    vec![
        FixSuggestion::new(
            vec![
                "persona providers".to_string(),
                format!("persona research \"<description>\" --provider {provider}"),
            ],
            format!(
                "The request to {provider} failed{status_info}: {message}. \
                 This is usually a transient network or provider-side issue."
            ),
        )
        .with_prevention(
            "Configure fallback_providers so another provider can answer when \
             one is down.",
        ),
    ]
}

/// Generates fix suggestions for rejected credentials.
#[must_use]
pub fn auth_failed_suggestions(provider: &str) -> Vec<FixSuggestion> {
    let mut suggestion = FixSuggestion::new(
        vec![
            "persona config".to_string(),
            "# Re-export the provider's API key variable and retry".to_string(),
        ],
        format!(
            "{provider} rejected the configured credential. The API key may be \
             revoked, expired, or scoped to a different project."
        ),
    )
    .with_prevention("Rotate keys through your secret manager and restart the process.");

    if let Some(url) = api_key_doc_for_provider(provider) {
        suggestion = suggestion.with_doc_url(url);
    }
    vec![suggestion]
}

/// Generates fix suggestions for timeout errors.
#[must_use]
pub fn timeout_suggestions(provider: &str, seconds: u64) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                format!("PERSONA_CALL_TIMEOUT={} persona research \"<description>\"", seconds * 2),
                "persona providers".to_string(),
            ],
            format!(
                "{provider} did not respond within {seconds}s. This could be due to \
                 network issues or a slow model."
            ),
        )
        .with_prevention(
            "Increase limits.call_timeout_seconds in the config file, or prefer a \
             faster model for this provider.",
        ),
    ]
}

/// Generates fix suggestions for DNS failure errors.
#[must_use]
pub fn dns_failure_suggestions(provider: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                "persona config".to_string(),
                "cat /etc/resolv.conf".to_string(),
            ],
            format!(
                "DNS resolution failed for the {provider} endpoint. Check that \
                 base_url is spelled correctly and that the network is reachable."
            ),
        )
        .with_prevention(
            "Verify your DNS settings and network connectivity. Try using a different \
             DNS server (e.g., 8.8.8.8 or 1.1.1.1).",
        ),
    ]
}

/// Generates fix suggestions for SSL/TLS errors.
#[must_use]
pub fn ssl_error_suggestions(message: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["# Check system certificate store".to_string()],
            format!(
                "SSL/TLS handshake or certificate verification failed: {message}. This may \
                 indicate certificate issues, proxy interference, or outdated CA certs."
            ),
        )
        .with_prevention(
            "Ensure your system certificates are up to date. If behind a corporate \
             proxy, you may need to add its certificate to your trust store.",
        ),
    ]
}

/// Generates fix suggestions for rate limit errors.
#[must_use]
pub fn rate_limited_suggestions(provider: &str, retry_after: Option<Duration>) -> Vec<FixSuggestion> {
    let wait_cmd = retry_after.map_or_else(
        || "# Wait before retrying".to_string(),
        |d| {
            format!(
                "sleep {} && persona research \"<description>\" --provider {provider}",
                d.as_secs()
            )
        },
    );

    let wait_info = retry_after.map_or_else(
        || "Wait before retrying.".to_string(),
        |d| format!("Try again in {} seconds.", d.as_secs()),
    );

    vec![
        FixSuggestion::new(
            vec![wait_cmd],
            format!("You have been rate limited by {provider}. {wait_info}"),
        )
        .with_prevention(
            "Lower rate_limits.requests_per_minute for this provider so requests are \
             throttled locally, and keep the response cache enabled.",
        ),
    ]
}

/// Generates fix suggestions for unparseable provider output.
#[must_use]
pub fn parsing_failure_suggestions() -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["persona research \"<description>\" --provider <other>".to_string()],
            "The provider answered with text that contains no usable JSON object. \
             Some models ignore formatting instructions at high temperature.",
        )
        .with_prevention("Lower limits.temperature or prefer a model with JSON mode."),
    ]
}

/// Generates fix suggestions for descriptors that failed schema checks.
#[must_use]
pub fn validation_failure_suggestions(field_errors: &[String]) -> Vec<FixSuggestion> {
    let fields = if field_errors.is_empty() {
        "unknown fields".to_string()
    } else {
        field_errors.join(", ")
    };
    vec![FixSuggestion::new(
        vec!["persona research \"<a more specific description>\"".to_string()],
        format!(
            "The provider returned a descriptor that does not match the schema ({fields}). \
             A more specific description usually yields a complete answer."
        ),
    )]
}

/// Generates fix suggestions for exceeded quotas.
#[must_use]
pub fn quota_exceeded_suggestions(quota_type: QuotaType, detail: &str) -> Vec<FixSuggestion> {
    let (commands, context) = match quota_type {
        QuotaType::Hourly | QuotaType::Daily => (
            vec!["persona config".to_string()],
            format!(
                "The {quota_type} spend limit has been reached ({detail}). New research \
                 requests are served by the non-AI fallback until spend ages out of the window."
            ),
        ),
        QuotaType::PerRequest => (
            vec!["persona config".to_string()],
            format!(
                "The estimated cost of this request exceeds costs.per_request_limit ({detail}). \
                 Lower limits.max_tokens or raise the limit."
            ),
        ),
        QuotaType::Provider => (
            vec!["persona providers".to_string()],
            format!("The provider reported an exhausted account quota: {detail}."),
        ),
    };
    vec![
        FixSuggestion::new(commands, context)
            .with_prevention("Review the [costs] section of the config file."),
    ]
}

/// Generates fix suggestions when no provider could be tried.
#[must_use]
pub fn no_available_provider_suggestions(reason: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                "persona providers".to_string(),
                "export OPENAI_API_KEY=\"sk-...\"".to_string(),
            ],
            format!(
                "No configured provider could be used: {reason}. Providers without \
                 their credential variable set are skipped, and rate-limited or \
                 unhealthy providers are skipped until they recover."
            ),
        )
        .with_prevention("Configure at least one fallback provider with a valid credential."),
    ]
}

/// Generates fix suggestions for config parse errors.
#[must_use]
pub fn config_parse_suggestions(path: &str, message: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![format!("$EDITOR {path}"), "persona config".to_string()],
            format!("The config file has a syntax error. The TOML parser reported: {message}"),
        )
        .with_prevention(
            "Use `persona config` after editing to check the effective configuration.",
        ),
    ]
}

/// Generates fix suggestions for invalid provider errors.
#[must_use]
pub fn invalid_provider_suggestions(name: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["persona providers".to_string()],
        format!(
            "'{name}' is not a configured provider. Add a [providers.{name}] section \
             to the config file or pick one of the listed providers."
        ),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_suggestion_builder() {
        let suggestion = FixSuggestion::new(vec!["cmd".to_string()], "context")
            .with_prevention("prevent")
            .with_doc_url("https://example.com");

        assert_eq!(suggestion.commands, vec!["cmd"]);
        assert_eq!(suggestion.context, "context");
        assert_eq!(suggestion.prevention.as_deref(), Some("prevent"));
        assert_eq!(suggestion.doc_url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn api_key_docs_for_known_providers() {
        assert!(api_key_doc_for_provider("openai").is_some());
        assert!(api_key_doc_for_provider("Anthropic").is_some());
        assert!(api_key_doc_for_provider("gemini").is_some());
        assert!(api_key_doc_for_provider("ollama").is_none());
    }

    #[test]
    fn connection_failure_buckets_auth() {
        let suggestions = connection_failure_suggestions("openai", Some(401), "unauthorized");
        assert!(suggestions[0].context.contains("rejected the configured credential"));
        assert!(suggestions[0].doc_url.is_some());
    }

    #[test]
    fn connection_failure_buckets_dns() {
        let suggestions =
            connection_failure_suggestions("anthropic", None, "failed to resolve host");
        assert!(suggestions[0].context.contains("DNS resolution failed"));
    }

    #[test]
    fn connection_failure_default_bucket_mentions_status() {
        let suggestions = connection_failure_suggestions("gemini", Some(502), "bad gateway");
        assert!(suggestions[0].context.contains("HTTP 502"));
    }

    #[test]
    fn rate_limit_suggestions_include_retry_info() {
        let suggestions = rate_limited_suggestions("openai", Some(Duration::from_secs(60)));
        assert!(suggestions[0].commands[0].contains("sleep 60"));
        assert!(suggestions[0].context.contains("60 seconds"));
    }

    #[test]
    fn timeout_suggestions_double_the_timeout() {
        let suggestions = timeout_suggestions("openai", 30);
        assert!(suggestions[0].commands[0].contains("PERSONA_CALL_TIMEOUT=60"));
    }

    #[test]
    fn validation_suggestions_list_fields() {
        let suggestions = validation_failure_suggestions(&["traits: empty".to_string()]);
        assert!(suggestions[0].context.contains("traits: empty"));
    }
}
