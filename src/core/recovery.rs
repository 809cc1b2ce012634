//! Failure classification and remediation planning.
//!
//! [`ErrorRecoveryOrchestrator::recover`] maps an error plus the caller's
//! context to a [`RecoveryPlan`]: what to do now, what to fix later, and
//! whether a non-AI fallback exists. For validation failures it also runs the
//! repair and partial-extraction stages and, if they succeed, returns the
//! recovered descriptor inside the plan.

use std::time::Duration;

use serde::Serialize;

use crate::core::validation::{self, ValidationOutcome};
use crate::error::{PersonaError, QuotaType};

/// Rate limits up to this long are waited out instead of switching provider.
pub const DEFAULT_WAIT_THRESHOLD: Duration = Duration::from_secs(60);

/// One recommended step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RecoveryAction {
    WaitAndRetry { delay_secs: u64 },
    SwitchProvider { to: String },
    UseFallbackResearch,
    RetryWithLongerTimeout { seconds: u64 },
    RetryWithBackoff,
    RetryWithRefinedPrompt,
    VerifyApiKey { provider: String },
    CheckNetwork,
    CheckDns,
    CheckCertificates,
    WaitForQuotaReset { quota: String },
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitAndRetry { delay_secs } => write!(f, "wait {delay_secs}s and retry"),
            Self::SwitchProvider { to } => write!(f, "switch to provider {to}"),
            Self::UseFallbackResearch => f.write_str("use non-AI fallback research"),
            Self::RetryWithLongerTimeout { seconds } => {
                write!(f, "retry with a {seconds}s timeout")
            }
            Self::RetryWithBackoff => f.write_str("retry with exponential backoff"),
            Self::RetryWithRefinedPrompt => f.write_str("retry with a stricter JSON-only prompt"),
            Self::VerifyApiKey { provider } => write!(f, "verify the API key for {provider}"),
            Self::CheckNetwork => f.write_str("check network connectivity"),
            Self::CheckDns => f.write_str("check DNS resolution of the provider endpoint"),
            Self::CheckCertificates => f.write_str("check TLS certificates and proxies"),
            Self::WaitForQuotaReset { quota } => write!(f, "wait for the {quota} quota to reset"),
        }
    }
}

/// What the caller knows when asking for a plan.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    /// Provider whose call failed, if any.
    pub provider: Option<String>,
    /// Providers not yet tried for this request.
    pub fallback_providers: Vec<String>,
    /// Whether a non-AI research collaborator is wired in.
    pub fallback_research_available: bool,
    /// Full provider text for validation failures. Errors only keep a
    /// truncated copy.
    pub raw_response: Option<String>,
    /// Timeout that was in force for the failed call.
    pub call_timeout: Option<Duration>,
}

/// Remediation for one failure.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    pub immediate_actions: Vec<RecoveryAction>,
    pub long_term_actions: Vec<String>,
    pub fallback_available: bool,
    /// Set when recovery itself produced usable data.
    pub success: bool,
    #[serde(skip)]
    pub recovered: Option<ValidationOutcome>,
}

impl RecoveryPlan {
    fn new(fallback_available: bool) -> Self {
        Self {
            fallback_available,
            ..Self::default()
        }
    }

    fn act(&mut self, action: RecoveryAction) -> &mut Self {
        if !self.immediate_actions.contains(&action) {
            self.immediate_actions.push(action);
        }
        self
    }

    fn later(&mut self, note: impl Into<String>) -> &mut Self {
        self.long_term_actions.push(note.into());
        self
    }

    /// Whether the plan suggests another attempt with a refined prompt.
    #[must_use]
    pub fn wants_refined_prompt(&self) -> bool {
        self.immediate_actions
            .contains(&RecoveryAction::RetryWithRefinedPrompt)
    }

    /// Whether the plan routes to the non-AI fallback.
    #[must_use]
    pub fn recommends_fallback(&self) -> bool {
        self.immediate_actions
            .contains(&RecoveryAction::UseFallbackResearch)
    }

    /// Human-readable immediate actions.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.immediate_actions.iter().map(ToString::to_string).collect()
    }
}

/// Stateless failure classifier.
#[derive(Debug, Clone)]
pub struct ErrorRecoveryOrchestrator {
    wait_threshold: Duration,
}

impl Default for ErrorRecoveryOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_THRESHOLD)
    }
}

impl ErrorRecoveryOrchestrator {
    #[must_use]
    pub const fn new(wait_threshold: Duration) -> Self {
        Self { wait_threshold }
    }

    /// Build a plan for `error`.
    #[must_use]
    pub fn recover(&self, error: &PersonaError, ctx: &RecoveryContext) -> RecoveryPlan {
        let mut plan = RecoveryPlan::new(ctx.fallback_research_available);
        let provider = ctx
            .provider
            .clone()
            .or_else(|| error.provider().map(str::to_string))
            .unwrap_or_else(|| "the provider".to_string());

        match error {
            PersonaError::RateLimited { retry_after, .. } => {
                let wait = retry_after.unwrap_or(self.wait_threshold);
                if wait <= self.wait_threshold {
                    plan.act(RecoveryAction::WaitAndRetry {
                        delay_secs: wait.as_secs(),
                    });
                } else if let Some(next) = ctx.fallback_providers.first() {
                    plan.act(RecoveryAction::SwitchProvider { to: next.clone() });
                } else {
                    self.fallback(&mut plan, ctx);
                }
                plan.later(format!(
                    "Lower requests_per_minute for {provider} so calls are throttled locally"
                ));
            }

            PersonaError::ValidationFailure { raw_text, .. }
            | PersonaError::ParsingFailure { raw_text } => {
                let text = ctx.raw_response.as_deref().unwrap_or(raw_text);
                if let Some(outcome) = validation::recover(text) {
                    tracing::debug!(outcome = outcome.label(), "Recovered descriptor from invalid response");
                    plan.success = true;
                    plan.recovered = Some(outcome);
                } else {
                    plan.act(RecoveryAction::RetryWithRefinedPrompt);
                    self.fallback(&mut plan, ctx);
                }
                plan.later("Prefer models with a JSON output mode or lower the temperature");
            }

            PersonaError::ConnectionFailure {
                status, message, ..
            } => {
                let lower = message.to_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    plan.act(RecoveryAction::RetryWithLongerTimeout {
                        seconds: Self::longer_timeout(ctx),
                    });
                } else if lower.contains("dns") || lower.contains("resolve") {
                    plan.act(RecoveryAction::CheckDns).act(RecoveryAction::CheckNetwork);
                } else if lower.contains("certificate") || lower.contains("ssl") || lower.contains("tls") {
                    plan.act(RecoveryAction::CheckCertificates);
                } else if matches!(status, Some(401 | 403))
                    || lower.contains("401")
                    || lower.contains("authentication")
                {
                    plan.act(RecoveryAction::VerifyApiKey {
                        provider: provider.clone(),
                    });
                    plan.later(format!("Rotate the credential for {provider}"));
                } else {
                    plan.act(RecoveryAction::RetryWithBackoff);
                }
                Self::switch(&mut plan, ctx);
                self.fallback(&mut plan, ctx);
                plan.later("Configure additional fallback providers");
            }

            PersonaError::Timeout { .. } => {
                plan.act(RecoveryAction::RetryWithLongerTimeout {
                    seconds: Self::longer_timeout(ctx),
                });
                Self::switch(&mut plan, ctx);
                self.fallback(&mut plan, ctx);
                plan.later("Raise limits.call_timeout_seconds or prefer a faster model");
            }

            PersonaError::QuotaExceeded { quota_type, .. } => {
                if *quota_type == QuotaType::Provider {
                    Self::switch(&mut plan, ctx);
                    plan.later(format!("Top up the account for {provider}"));
                } else {
                    plan.act(RecoveryAction::WaitForQuotaReset {
                        quota: quota_type.to_string(),
                    });
                    plan.later("Review the [costs] limits");
                }
                self.fallback(&mut plan, ctx);
            }

            PersonaError::MalformedResponse { .. } => {
                Self::switch(&mut plan, ctx);
                self.fallback(&mut plan, ctx);
                plan.later(format!("Check base_url for {provider}"));
            }

            _ => {
                self.fallback(&mut plan, ctx);
                plan.later("Configure at least one provider with a valid credential");
            }
        }

        plan
    }

    fn switch(plan: &mut RecoveryPlan, ctx: &RecoveryContext) {
        if let Some(next) = ctx.fallback_providers.first() {
            plan.act(RecoveryAction::SwitchProvider { to: next.clone() });
        }
    }

    #[allow(clippy::unused_self)]
    fn fallback(&self, plan: &mut RecoveryPlan, ctx: &RecoveryContext) {
        if ctx.fallback_research_available {
            plan.act(RecoveryAction::UseFallbackResearch);
        }
    }

    fn longer_timeout(ctx: &RecoveryContext) -> u64 {
        ctx.call_timeout
            .map_or(60, |t| (t.as_secs() * 2).min(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(fallbacks: &[&str], research: bool) -> RecoveryContext {
        RecoveryContext {
            provider: Some("openai".to_string()),
            fallback_providers: fallbacks.iter().map(|s| (*s).to_string()).collect(),
            fallback_research_available: research,
            raw_response: None,
            call_timeout: Some(Duration::from_secs(30)),
        }
    }

    fn rate_limited(secs: u64) -> PersonaError {
        PersonaError::RateLimited {
            provider: "openai".into(),
            retry_after: Some(Duration::from_secs(secs)),
        }
    }

    fn connection(message: &str) -> PersonaError {
        PersonaError::ConnectionFailure {
            provider: "openai".into(),
            status: None,
            message: message.into(),
        }
    }

    #[test]
    fn short_rate_limit_waits() {
        let plan = ErrorRecoveryOrchestrator::default().recover(&rate_limited(5), &ctx(&["b"], true));
        assert_eq!(
            plan.immediate_actions,
            vec![RecoveryAction::WaitAndRetry { delay_secs: 5 }]
        );
        assert!(plan.fallback_available);
    }

    #[test]
    fn long_rate_limit_switches_provider() {
        let plan =
            ErrorRecoveryOrchestrator::default().recover(&rate_limited(120), &ctx(&["anthropic"], true));
        assert_eq!(
            plan.immediate_actions,
            vec![RecoveryAction::SwitchProvider {
                to: "anthropic".into()
            }]
        );
    }

    #[test]
    fn long_rate_limit_without_providers_uses_fallback_research() {
        let plan = ErrorRecoveryOrchestrator::default().recover(&rate_limited(120), &ctx(&[], true));
        assert_eq!(plan.immediate_actions, vec![RecoveryAction::UseFallbackResearch]);
        assert!(plan.recommends_fallback());
    }

    #[test]
    fn fallback_flag_tracks_context() {
        let orchestrator = ErrorRecoveryOrchestrator::default();
        for err in [rate_limited(120), connection("boom"), PersonaError::parsing("x")] {
            assert!(!orchestrator.recover(&err, &ctx(&[], false)).fallback_available);
            assert!(orchestrator.recover(&err, &ctx(&[], true)).fallback_available);
        }
    }

    #[test]
    fn connection_failures_are_bucketed() {
        let orchestrator = ErrorRecoveryOrchestrator::default();
        let c = ctx(&[], false);

        let plan = orchestrator.recover(&connection("operation timed out"), &c);
        assert_eq!(
            plan.immediate_actions[0],
            RecoveryAction::RetryWithLongerTimeout { seconds: 60 }
        );

        let plan = orchestrator.recover(&connection("dns error: failed to lookup address"), &c);
        assert_eq!(plan.immediate_actions[0], RecoveryAction::CheckDns);

        let plan = orchestrator.recover(&connection("invalid peer certificate"), &c);
        assert_eq!(plan.immediate_actions[0], RecoveryAction::CheckCertificates);

        let plan = orchestrator.recover(&connection("authentication failed (HTTP 401)"), &c);
        assert_eq!(
            plan.immediate_actions[0],
            RecoveryAction::VerifyApiKey {
                provider: "openai".into()
            }
        );

        let plan = orchestrator.recover(&connection("connection reset by peer"), &c);
        assert_eq!(plan.immediate_actions, vec![RecoveryAction::RetryWithBackoff]);
    }

    #[test]
    fn default_bucket_then_fallback() {
        let plan = ErrorRecoveryOrchestrator::default()
            .recover(&connection("HTTP 502"), &ctx(&["gemini"], true));
        assert_eq!(
            plan.immediate_actions,
            vec![
                RecoveryAction::RetryWithBackoff,
                RecoveryAction::SwitchProvider { to: "gemini".into() },
                RecoveryAction::UseFallbackResearch,
            ]
        );
    }

    #[test]
    fn validation_failure_recovered_by_repair() {
        let raw = r#"{"name":"Ada","type":"recognizable-person","traits":[{"name":"precise","intensity":9}],"communicationStyle":{"tone":"exact","formality":"formal","verbosity":"concise","technicalLevel":"expert"},}"#;
        let err = PersonaError::parsing(raw);
        let mut context = ctx(&[], true);
        context.raw_response = Some(raw.to_string());

        let plan = ErrorRecoveryOrchestrator::default().recover(&err, &context);
        assert!(plan.success);
        assert!(matches!(plan.recovered, Some(ValidationOutcome::Repaired(_))));
        assert!(plan.immediate_actions.is_empty());
    }

    #[test]
    fn unrecoverable_validation_recommends_refined_prompt_then_fallback() {
        let err = PersonaError::parsing("I cannot help with that.");
        let plan = ErrorRecoveryOrchestrator::default().recover(&err, &ctx(&[], true));
        assert!(!plan.success);
        assert_eq!(
            plan.immediate_actions,
            vec![
                RecoveryAction::RetryWithRefinedPrompt,
                RecoveryAction::UseFallbackResearch
            ]
        );
        assert!(plan.wants_refined_prompt());
    }

    #[test]
    fn local_quota_waits_for_reset() {
        let err = PersonaError::QuotaExceeded {
            quota_type: QuotaType::Hourly,
            detail: "x".into(),
        };
        let plan = ErrorRecoveryOrchestrator::default().recover(&err, &ctx(&[], true));
        assert_eq!(
            plan.describe(),
            vec![
                "wait for the hourly quota to reset".to_string(),
                "use non-AI fallback research".to_string()
            ]
        );
    }
}
