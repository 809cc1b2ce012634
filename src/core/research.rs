//! Research orchestrator: the single entry point for collaborators.
//!
//! `research` never fails for expected failure modes. Everything that went
//! wrong is reported through `errors`, `suggestions` and `warnings` on the
//! returned [`ResearchResult`].
//!
//! Flow for one request:
//!
//! 1. cache lookup by fingerprint;
//! 2. cost admission (per-request estimate, hourly/daily limits);
//! 3. provider manager with ordered fallback;
//! 4. strict validation, then recovery (repair or partial extraction);
//! 5. one refined-prompt retry when recovery asks for it;
//! 6. cache write for complete descriptors only;
//! 7. on total failure, the external fallback collaborator, exactly once.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::cost::{
    CostReservation, CostSummary, CostThresholds, CostTracker, CostWindow, ThresholdReport,
    estimate_tokens,
};
use crate::core::descriptor::PersonalityDescriptor;
use crate::core::health::{HealthState, HealthTracker, ProviderHealth};
use crate::core::manager::{Invocation, ManagerFailure, ProviderManager};
use crate::core::pricing::PricingTable;
use crate::core::prompt::{refined_prompt, research_prompt};
use crate::core::provider::ProviderRegistry;
use crate::core::recovery::{ErrorRecoveryOrchestrator, RecoveryContext, RecoveryPlan};
use crate::core::tasks::BackgroundTasks;
use crate::core::validation::{self, PARTIAL_CONFIDENCE, ValidationOutcome};
use crate::error::{PersonaError, Result};
use crate::storage::cache::{CacheStats, CachedResponse, ResponseCache, fingerprint};
use crate::storage::config::Config;

/// Confidence for a complete descriptor that carries no sources.
pub const DEFAULT_CONFIDENCE: f64 = 0.9;
/// Ceiling for descriptors that needed textual repair.
pub const REPAIRED_CONFIDENCE_CAP: f64 = 0.7;

/// Non-AI research collaborator invoked once on total failure.
pub type FallbackResearch = Arc<dyn Fn(String) -> BoxFuture<'static, ResearchResult> + Send + Sync>;

/// Where a profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileOrigin {
    Provider,
    Cache,
    Fallback,
}

/// One descriptor with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchedProfile {
    pub descriptor: PersonalityDescriptor,
    pub confidence: f64,
    pub origin: ProfileOrigin,
    /// `complete`, `repaired` or `partial`.
    pub quality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ResearchedProfile {
    /// Profile produced by a fallback collaborator.
    #[must_use]
    pub fn from_fallback(descriptor: PersonalityDescriptor, confidence: f64) -> Self {
        Self {
            descriptor,
            confidence,
            origin: ProfileOrigin::Fallback,
            quality: "complete".to_string(),
            provider: None,
            model: None,
        }
    }
}

/// An error as reported to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub retryable: bool,
}

impl From<&PersonaError> for ReportedError {
    fn from(err: &PersonaError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            provider: err.provider().map(str::to_string),
            retryable: err.is_retryable(),
        }
    }
}

/// Overall outcome of one research request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResearchStatus {
    Found,
    #[default]
    NoProfilesFound,
    Cancelled,
}

/// Result shape shared with the fallback collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    pub status: ResearchStatus,
    pub profiles: Vec<ResearchedProfile>,
    pub suggestions: Vec<String>,
    pub errors: Vec<ReportedError>,
    pub warnings: Vec<String>,
}

impl ResearchResult {
    #[must_use]
    pub fn found(profile: ResearchedProfile) -> Self {
        Self {
            status: ResearchStatus::Found,
            profiles: vec![profile],
            ..Self::default()
        }
    }

    /// Record an error and its fix suggestions.
    pub fn push_error(&mut self, err: &PersonaError) {
        self.errors.push(ReportedError::from(err));
        for suggestion in err.fix_suggestions() {
            self.push_suggestion(suggestion.context);
        }
    }

    pub fn push_suggestion(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        if !self.suggestions.contains(&suggestion) {
            self.suggestions.push(suggestion);
        }
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn push_plan(&mut self, plan: &RecoveryPlan) {
        for line in plan.describe() {
            self.push_suggestion(line);
        }
        for line in &plan.long_term_actions {
            self.push_suggestion(line.clone());
        }
    }

    fn push_thresholds(&mut self, report: &ThresholdReport) {
        for entry in report.warnings.iter().chain(&report.exceeded) {
            self.push_warning(entry.message());
        }
    }

    /// Fold another result (the fallback's) into this one.
    fn merge(&mut self, other: Self) {
        self.profiles.extend(other.profiles);
        for s in other.suggestions {
            self.push_suggestion(s);
        }
        self.errors.extend(other.errors);
        for w in other.warnings {
            self.push_warning(w);
        }
    }

    /// Set `status` from the profiles gathered so far.
    fn finish(mut self) -> Self {
        if self.status != ResearchStatus::Cancelled {
            self.status = if self.profiles.is_empty() {
                ResearchStatus::NoProfilesFound
            } else {
                ResearchStatus::Found
            };
        }
        if self.status == ResearchStatus::NoProfilesFound {
            self.push_suggestion(
                "No profiles found. Try a more specific description or check `persona providers`.",
            );
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Confidence for a validated descriptor.
#[must_use]
pub fn confidence_for(outcome: &ValidationOutcome) -> f64 {
    let stated = outcome
        .descriptor()
        .mean_source_confidence()
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);
    match outcome {
        ValidationOutcome::Complete(_) => stated,
        ValidationOutcome::Repaired(_) => stated.min(REPAIRED_CONFIDENCE_CAP),
        ValidationOutcome::Partial(_) => PARTIAL_CONFIDENCE,
    }
}

/// Aborted by cancellation.
struct Cancelled;

/// Top-level service. Owns the shared trackers and the background tasks.
pub struct ResearchOrchestrator {
    manager: Arc<ProviderManager>,
    health: Arc<HealthTracker>,
    costs: Arc<CostTracker>,
    cache: Option<Arc<ResponseCache>>,
    cache_ttl: chrono::Duration,
    recovery: ErrorRecoveryOrchestrator,
    fallback: Option<FallbackResearch>,
    sweep_interval: Duration,
    probe_interval: Duration,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl std::fmt::Debug for ResearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchOrchestrator")
            .field("cache", &self.cache.as_ref().map(|c| c.kind()))
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl ResearchOrchestrator {
    /// Build every service from `config`, reading credentials from the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry, HTTP client or cache backend cannot
    /// be built.
    pub fn from_config(config: &Config, fallback: Option<FallbackResearch>) -> Result<Self> {
        let registry = ProviderRegistry::from_env(config)?;
        let cache = ResponseCache::from_settings(&config.cache)?;
        Self::new(config, registry, cache, fallback)
    }

    /// Build from an explicit registry and cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        registry: ProviderRegistry,
        cache: Option<ResponseCache>,
        fallback: Option<FallbackResearch>,
    ) -> Result<Self> {
        let health = Arc::new(HealthTracker::new(config.limits.unhealthy_after_failures));
        let pricing = PricingTable::current().with_overrides(&config.pricing);
        let costs = Arc::new(CostTracker::new(CostThresholds::from(&config.costs), pricing));
        let manager = ProviderManager::new(
            config,
            Arc::new(registry),
            Arc::clone(&health),
            Arc::clone(&costs),
        )?
        .with_fallback_research(fallback.is_some());

        Ok(Self {
            manager: Arc::new(manager),
            health,
            costs,
            cache: cache.map(Arc::new),
            cache_ttl: chrono::Duration::from_std(config.cache.ttl())
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            recovery: ErrorRecoveryOrchestrator::default(),
            fallback,
            sweep_interval: Duration::from_secs(config.cache.cleanup_interval_seconds.max(1)),
            probe_interval: Duration::from_secs(config.limits.health_probe_interval_seconds.max(1)),
            tasks: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn manager(&self) -> &ProviderManager {
        &self.manager
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the cache sweep and health probe loops. A second call is a no-op.
    pub fn start_background_tasks(&self) {
        let mut slot = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(BackgroundTasks::spawn(
                self.cache.clone(),
                Arc::clone(&self.manager),
                self.sweep_interval,
                self.probe_interval,
            ));
        }
    }

    /// Stop background loops and wait for them to exit.
    pub async fn shutdown(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
    }

    // =========================================================================
    // Research
    // =========================================================================

    /// Research a free-text description.
    pub async fn research(&self, description: &str, preferred: Option<&str>) -> ResearchResult {
        self.research_with_cancel(description, preferred, &CancellationToken::new())
            .await
    }

    /// Research with explicit cancellation. A cancelled request abandons any
    /// in-flight provider call and writes nothing to the cache; usage already
    /// recorded for completed calls stays recorded.
    pub async fn research_with_cancel(
        &self,
        description: &str,
        preferred: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResearchResult {
        let mut result = ResearchResult::default();
        match self.run(description, preferred, cancel, &mut result).await {
            Ok(()) => result.finish(),
            Err(Cancelled) => {
                tracing::info!("Research request cancelled");
                result.status = ResearchStatus::Cancelled;
                result.push_error(&PersonaError::Cancelled);
                result.finish()
            }
        }
    }

    async fn run(
        &self,
        description: &str,
        preferred: Option<&str>,
        cancel: &CancellationToken,
        result: &mut ResearchResult,
    ) -> std::result::Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let key = fingerprint(description, preferred, None);
        if let Some(cache) = &self.cache
            && let Some(hit) = cancellable(cancel, cache.get(&key)).await?
        {
            tracing::debug!(fingerprint = %key, hits = hit.hit_count, "Cache hit");
            result.profiles.push(ResearchedProfile {
                confidence: confidence_for(&ValidationOutcome::Complete(hit.descriptor.clone())),
                descriptor: hit.descriptor,
                origin: ProfileOrigin::Cache,
                quality: "complete".to_string(),
                provider: Some(hit.provider),
                model: Some(hit.model),
            });
            return Ok(());
        }

        let prompt = research_prompt(description);
        // Held until the request finishes or is cancelled.
        let reservation = match self.admit(&prompt, preferred, result) {
            Ok(reservation) => reservation,
            Err(err) => {
                tracing::warn!(error = %err, "Request refused by cost admission");
                result.push_error(&err);
                return self.fall_back(description, cancel, result).await;
            }
        };

        let invocation = match cancellable(
            cancel,
            self.manager
                .select_and_invoke(&prompt, preferred, None, Some(&reservation)),
        )
        .await?
        {
            Ok(invocation) => invocation,
            Err(failure) => {
                Self::absorb_failure(result, &failure);
                return self.fall_back(description, cancel, result).await;
            }
        };
        result.push_thresholds(&invocation.thresholds);

        let Some((outcome, source)) = self
            .interpret(description, invocation, &reservation, cancel, result)
            .await?
        else {
            return self.fall_back(description, cancel, result).await;
        };

        if outcome.is_complete()
            && let Some(cache) = &self.cache
        {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let entry = CachedResponse::new(
                &key,
                outcome.descriptor().clone(),
                &source.provider,
                &source.model,
                self.cache_ttl,
            );
            cancellable(cancel, cache.set(&key, entry)).await?;
        }

        result.profiles.push(ResearchedProfile {
            confidence: confidence_for(&outcome),
            quality: outcome.label().to_string(),
            descriptor: outcome.into_descriptor(),
            origin: ProfileOrigin::Provider,
            provider: Some(source.provider),
            model: Some(source.model),
        });
        Ok(())
    }

    /// Validate provider text, recovering or retrying once with a refined
    /// prompt. `None` means nothing usable came back.
    async fn interpret(
        &self,
        description: &str,
        invocation: Invocation,
        reservation: &CostReservation<'_>,
        cancel: &CancellationToken,
        result: &mut ResearchResult,
    ) -> std::result::Result<Option<(ValidationOutcome, Invocation)>, Cancelled> {
        let err = match validation::validate_strict(&invocation.text) {
            Ok(descriptor) => return Ok(Some((ValidationOutcome::Complete(descriptor), invocation))),
            Err(err) => err,
        };

        let mut plan = self.recovery.recover(
            &err,
            &RecoveryContext {
                provider: Some(invocation.provider.clone()),
                fallback_providers: Vec::new(),
                fallback_research_available: self.fallback.is_some(),
                raw_response: Some(invocation.text.clone()),
                call_timeout: Some(self.manager.call_timeout()),
            },
        );
        if plan.success
            && let Some(outcome) = plan.recovered.take()
        {
            if !outcome.is_complete() {
                result.push_warning(format!(
                    "Only partial data could be extracted from {}; treat it as low confidence",
                    invocation.provider
                ));
            }
            return Ok(Some((outcome, invocation)));
        }

        result.push_error(&err);
        if !plan.wants_refined_prompt() {
            result.push_plan(&plan);
            return Ok(None);
        }

        let field_errors = match &err {
            PersonaError::ValidationFailure { field_errors, .. } => field_errors.clone(),
            _ => Vec::new(),
        };
        let prompt = refined_prompt(description, &field_errors);
        tracing::info!(provider = %invocation.provider, "Retrying with refined prompt");

        let retry = match cancellable(
            cancel,
            self.manager
                .select_and_invoke(
                    &prompt,
                    Some(&invocation.provider),
                    None,
                    Some(reservation),
                ),
        )
        .await?
        {
            Ok(retry) => retry,
            Err(failure) => {
                Self::absorb_failure(result, &failure);
                return Ok(None);
            }
        };
        result.push_thresholds(&retry.thresholds);

        match validation::validate(&retry.text) {
            Ok(outcome) => Ok(Some((outcome, retry))),
            Err(err) => {
                result.push_error(&err);
                result.push_plan(&plan);
                Ok(None)
            }
        }
    }

    /// Refuse requests whose estimate would break a limit; otherwise reserve
    /// the estimate for the life of the request.
    fn admit(
        &self,
        prompt: &str,
        preferred: Option<&str>,
        result: &mut ResearchResult,
    ) -> Result<CostReservation<'_>> {
        let estimate = self
            .manager
            .candidates(preferred, None)
            .first()
            .and_then(|name| self.manager.registry().get(name))
            .map_or(0.0, |descriptor| {
                self.costs.pricing().estimate(
                    &[descriptor.name.as_str(), descriptor.kind.as_str()],
                    &descriptor.default_model,
                    estimate_tokens(prompt),
                    u64::from(self.manager.max_tokens()),
                )
            });
        let admission = self.costs.admit(estimate)?;
        result.push_thresholds(&admission.report);
        Ok(admission.reservation)
    }

    fn absorb_failure(result: &mut ResearchResult, failure: &ManagerFailure) {
        for err in &failure.errors {
            result.push_error(err);
        }
        result.push_plan(&failure.plan);
    }

    /// Invoke the fallback collaborator, if any. Called at most once per request.
    async fn fall_back(
        &self,
        description: &str,
        cancel: &CancellationToken,
        result: &mut ResearchResult,
    ) -> std::result::Result<(), Cancelled> {
        let Some(fallback) = &self.fallback else {
            return Ok(());
        };
        tracing::info!("Falling back to non-AI research");
        let extra = cancellable(cancel, fallback(description.to_string())).await?;
        result.merge(extra);
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    #[must_use]
    pub fn health_snapshot(&self) -> Vec<(String, ProviderHealth, HealthState)> {
        self.health.snapshot()
    }

    #[must_use]
    pub fn cost_summary(&self, window: CostWindow) -> CostSummary {
        self.costs.get_costs(window)
    }

    #[must_use]
    pub fn threshold_report(&self) -> ThresholdReport {
        self.costs.check_thresholds()
    }

    /// Cost held by requests still in flight.
    #[must_use]
    pub fn reserved_cost(&self) -> f64 {
        self.costs.reserved()
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }
}

/// Race `fut` against cancellation. Dropping `fut` abandons any in-flight I/O.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> std::result::Result<T, Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        value = fut => Ok(value),
    }
}
