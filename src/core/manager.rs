//! Provider selection and invocation.
//!
//! The manager is the only writer of health state. For one request it walks
//! an ordered candidate list strictly sequentially:
//!
//! 1. preferred provider, then the default, then the fallback list sorted by
//!    consecutive failures (stable);
//! 2. drop duplicates, providers without credentials, unusable providers and
//!    providers that do not list a required model;
//! 3. for each candidate: local RPM guard, connection validation, then
//!    `generate` under the retry policy, a semaphore permit and a timeout.
//!
//! The first success wins. When every candidate fails the caller gets every
//! error plus a recovery plan for the last one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::core::cost::{CostReservation, CostTracker, ThresholdReport, TokenUsageRecord};
use crate::core::health::HealthTracker;
use crate::core::http::build_client;
use crate::core::provider::{ProviderDescriptor, ProviderRegistry};
use crate::core::recovery::{ErrorRecoveryOrchestrator, RecoveryContext, RecoveryPlan};
use crate::core::retry::RetryPolicy;
use crate::error::{PersonaError, Result};
use crate::providers::{GenerateRequest, Generation, ProviderClient, create_client};
use crate::storage::config::Config;

/// Sliding window for the local request-rate guard.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// A successful provider call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost: f64,
    /// Threshold state after recording this call's usage.
    #[serde(skip)]
    pub thresholds: ThresholdReport,
}

/// Every candidate failed, or none could be tried.
#[derive(Debug)]
pub struct ManagerFailure {
    /// One error per failed candidate, in attempt order.
    pub errors: Vec<PersonaError>,
    pub plan: RecoveryPlan,
}

impl ManagerFailure {
    /// The error the plan was built from.
    #[must_use]
    pub fn last_error(&self) -> Option<&PersonaError> {
        self.errors.last()
    }
}

/// Composes registry, health, retry, cost and recovery around the clients.
#[derive(Debug)]
pub struct ProviderManager {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    costs: Arc<CostTracker>,
    retry: RetryPolicy,
    recovery: ErrorRecoveryOrchestrator,
    http: Client,
    call_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
    permits: Semaphore,
    clients: Mutex<HashMap<String, Arc<ProviderClient>>>,
    request_log: Mutex<HashMap<String, VecDeque<Instant>>>,
    fallback_research_available: bool,
}

impl ProviderManager {
    /// Build from configuration and shared services.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        costs: Arc<CostTracker>,
    ) -> Result<Self> {
        let call_timeout = config.limits.call_timeout();
        Ok(Self {
            registry,
            health,
            costs,
            retry: RetryPolicy::from(&config.retry),
            recovery: ErrorRecoveryOrchestrator::default(),
            http: build_client(call_timeout)?,
            call_timeout,
            max_tokens: config.limits.max_tokens,
            temperature: config.limits.temperature,
            permits: Semaphore::new(config.limits.max_concurrent_calls.max(1)),
            clients: Mutex::new(HashMap::new()),
            request_log: Mutex::new(HashMap::new()),
            fallback_research_available: false,
        })
    }

    /// Declare whether a non-AI research collaborator exists; recovery plans
    /// carry this as `fallback_available`.
    #[must_use]
    pub const fn with_fallback_research(mut self, available: bool) -> Self {
        self.fallback_research_available = available;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    #[must_use]
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    #[must_use]
    pub const fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    // =========================================================================
    // Candidate ordering
    // =========================================================================

    /// Ordered provider names to try for one request.
    #[must_use]
    pub fn candidates(&self, preferred: Option<&str>, required_model: Option<&str>) -> Vec<String> {
        let mut order: Vec<&str> = Vec::new();
        if let Some(name) = preferred {
            if self.registry.get(name).is_some() {
                order.push(name);
            } else {
                tracing::warn!(provider = %name, "Preferred provider is not configured; ignoring");
            }
        }
        order.push(self.registry.default_provider());

        let mut fallbacks: Vec<&str> = self
            .registry
            .fallback_providers()
            .iter()
            .map(String::as_str)
            .collect();
        fallbacks.sort_by_key(|name| self.health.consecutive_failures(name));
        order.extend(fallbacks);

        let mut seen = Vec::with_capacity(order.len());
        for name in order {
            if seen.iter().any(|s: &String| s == name) {
                continue;
            }
            let Some(descriptor) = self.registry.get(name) else {
                continue;
            };
            if !descriptor.is_available() || !self.health.is_usable(name) {
                continue;
            }
            if let Some(model) = required_model
                && !descriptor.supports_model(model)
            {
                continue;
            }
            seen.push(name.to_string());
        }
        seen
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Try candidates in order until one returns text.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerFailure`] with every candidate's error and a recovery
    /// plan when nothing succeeded.
    pub async fn select_and_invoke(
        &self,
        prompt: &str,
        preferred: Option<&str>,
        required_model: Option<&str>,
        reservation: Option<&CostReservation<'_>>,
    ) -> std::result::Result<Invocation, ManagerFailure> {
        let candidates = self.candidates(preferred, required_model);
        if candidates.is_empty() {
            let error = PersonaError::NoAvailableProvider {
                reason: self.no_candidate_reason(required_model),
            };
            return Err(self.failure(vec![error], None));
        }

        let mut errors = Vec::new();
        for (index, name) in candidates.iter().enumerate() {
            let Some(descriptor) = self.registry.get(name) else {
                continue;
            };
            let model = required_model.unwrap_or(&descriptor.default_model);
            let started = Instant::now();

            match self.invoke_provider(descriptor, model, prompt).await {
                Ok(generation) => {
                    self.health.record_success(name);
                    let invocation = self.record_usage(descriptor, model, generation, reservation);
                    tracing::info!(
                        provider = %name,
                        model = %model,
                        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        tokens = invocation.prompt_tokens + invocation.completion_tokens,
                        "Provider call succeeded"
                    );
                    return Ok(invocation);
                }
                Err(err) => {
                    self.health.record_failure(name, &err);
                    errors.push(err);
                    if index + 1 < candidates.len() {
                        tracing::info!(
                            from = %name,
                            to = %candidates[index + 1],
                            "Falling back to next provider"
                        );
                    }
                }
            }
        }

        let last = candidates.last().cloned();
        Err(self.failure(errors, last))
    }

    /// Validate (once per client) then generate, both under retry.
    async fn invoke_provider(
        &self,
        descriptor: &ProviderDescriptor,
        model: &str,
        prompt: &str,
    ) -> Result<Generation> {
        let name = descriptor.name.as_str();
        self.check_request_rate(descriptor)?;
        let client = self.client_for(descriptor);

        if !client.is_validated() {
            self.retry
                .run(name, |_| self.bounded(name, client.ensure_validated()))
                .await?;
            self.health.record_success(name);
        }

        let request = GenerateRequest {
            prompt,
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        self.retry
            .run(name, |attempt| {
                tracing::debug!(provider = %name, model = %model, attempt, "Calling provider");
                self.note_request(name);
                self.bounded(name, client.generate(request))
            })
            .await
    }

    /// Run one call under a semaphore permit and the explicit call timeout.
    async fn bounded<T>(
        &self,
        provider: &str,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PersonaError::Cancelled)?;
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| PersonaError::Timeout {
                provider: provider.to_string(),
                seconds: self.call_timeout.as_secs(),
            })?
    }

    fn record_usage(
        &self,
        descriptor: &ProviderDescriptor,
        model: &str,
        generation: Generation,
        reservation: Option<&CostReservation<'_>>,
    ) -> Invocation {
        let cost = self.costs.pricing().estimate(
            &[descriptor.name.as_str(), descriptor.kind.as_str()],
            model,
            generation.prompt_tokens,
            generation.completion_tokens,
        );
        let thresholds = self.costs.record_usage_against(
            TokenUsageRecord::new(
                &descriptor.name,
                model,
                generation.prompt_tokens,
                generation.completion_tokens,
                cost,
            ),
            reservation,
        );
        for warning in &thresholds.warnings {
            tracing::warn!(quota = %warning.quota_type, "{}", warning.message());
        }
        Invocation {
            text: generation.text,
            provider: descriptor.name.clone(),
            model: model.to_string(),
            prompt_tokens: generation.prompt_tokens,
            completion_tokens: generation.completion_tokens,
            estimated_cost: cost,
            thresholds,
        }
    }

    /// Build a recovery plan for the last error. Every candidate has been
    /// tried by now, so there is nothing left to switch to.
    fn failure(&self, errors: Vec<PersonaError>, provider: Option<String>) -> ManagerFailure {
        let ctx = RecoveryContext {
            provider,
            fallback_providers: Vec::new(),
            fallback_research_available: self.fallback_research_available,
            raw_response: None,
            call_timeout: Some(self.call_timeout),
        };
        let plan = errors
            .last()
            .map(|err| self.recovery.recover(err, &ctx))
            .unwrap_or_default();
        ManagerFailure { errors, plan }
    }

    fn no_candidate_reason(&self, required_model: Option<&str>) -> String {
        let configured = self.registry.len();
        let available = self.registry.iter().filter(|d| d.is_available()).count();
        if available == 0 {
            return format!("none of the {configured} configured providers has a credential set");
        }
        if let Some(model) = required_model {
            return format!("no usable provider offers model '{model}'");
        }
        let unusable: Vec<String> = self
            .registry
            .iter()
            .filter(|d| d.is_available() && !self.health.is_usable(&d.name))
            .map(|d| format!("{} ({})", d.name, self.health.state(&d.name).as_str()))
            .collect();
        if unusable.is_empty() {
            "no candidate providers".to_string()
        } else {
            format!("all available providers are unusable: {}", unusable.join(", "))
        }
    }

    // =========================================================================
    // Clients
    // =========================================================================

    fn client_for(&self, descriptor: &ProviderDescriptor) -> Arc<ProviderClient> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(clients.entry(descriptor.name.clone()).or_insert_with(|| {
            Arc::new(create_client(
                descriptor,
                self.registry.credential(&descriptor.name).cloned(),
                self.http.clone(),
                self.call_timeout,
            ))
        }))
    }

    // =========================================================================
    // Local rate guard
    // =========================================================================

    fn check_request_rate(&self, descriptor: &ProviderDescriptor) -> Result<()> {
        let limit = descriptor.rate_limits.requests_per_minute;
        if limit == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut log = self.request_log.lock().unwrap_or_else(PoisonError::into_inner);
        let window = log.entry(descriptor.name.clone()).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW)
        {
            window.pop_front();
        }
        if window.len() < limit as usize {
            return Ok(());
        }
        let retry_after = window
            .front()
            .map(|oldest| RATE_WINDOW.saturating_sub(now.duration_since(*oldest)));
        tracing::debug!(
            provider = %descriptor.name,
            limit,
            "Local request-per-minute limit reached"
        );
        Err(PersonaError::RateLimited {
            provider: descriptor.name.clone(),
            retry_after,
        })
    }

    fn note_request(&self, provider: &str) {
        self.request_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(provider.to_string())
            .or_default()
            .push_back(Instant::now());
    }

    // =========================================================================
    // Probing
    // =========================================================================

    /// Probe every unhealthy provider and mark the reachable ones healthy.
    /// Returns `(provider, recovered)` pairs.
    pub async fn probe_unhealthy(&self) -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for name in self.health.unhealthy_providers() {
            let Some(descriptor) = self.registry.get(&name) else {
                continue;
            };
            if !descriptor.is_available() {
                continue;
            }
            let client = self.client_for(descriptor);
            let recovered = self.bounded(&name, client.probe()).await.is_ok();
            if recovered {
                self.health.record_success(&name);
            } else {
                tracing::debug!(provider = %name, "Provider still unreachable");
            }
            results.push((name, recovered));
        }
        results
    }

    /// Validate every available provider's connection. Health is updated
    /// with each outcome.
    pub async fn check_connections(&self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::new();
        for descriptor in self.registry.iter().filter(|d| d.is_available()) {
            let client = self.client_for(descriptor);
            let outcome = self.bounded(&descriptor.name, client.ensure_validated()).await;
            match &outcome {
                Ok(()) => self.health.record_success(&descriptor.name),
                Err(err) => self.health.record_failure(&descriptor.name, err),
            }
            results.push((descriptor.name.clone(), outcome));
        }
        results
    }
}
