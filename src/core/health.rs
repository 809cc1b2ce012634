//! Per-provider health state machine.
//!
//! ```text
//! Healthy ──rate limit──▶ RateLimited ──(now > reset)──▶ Degraded
//!    ▲                                                      │
//!    │                               N consecutive failures ▼
//!    └──────────────── any success ◀──────────────────── Unhealthy
//! ```
//!
//! Rate-limited providers leave that state on their own once the reset time
//! passes. Unhealthy providers only come back through a success (a normal call
//! or a health probe). Only the provider manager writes to the tracker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::PersonaError;

/// Default failure count that flips a provider to `Unhealthy`.
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;

/// Derived state of a provider at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthState {
    Healthy,
    /// Recent failures below the unhealthy threshold. Still usable.
    Degraded,
    /// Rate limited with an unexpired reset time.
    RateLimited,
    Unhealthy,
}

impl HealthState {
    /// Whether the manager may route calls to a provider in this state.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::RateLimited => "rate-limited",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable health record for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub healthy: bool,
    /// Every failure since the last success, rate limits included. Orders
    /// fallback candidates.
    pub consecutive_failures: u32,
    /// Failures since the last success that were not rate limits. Only these
    /// count towards `Unhealthy`.
    pub consecutive_errors: u32,
    pub last_failure_reason: Option<String>,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ProviderHealth {
    fn fresh() -> Self {
        Self {
            healthy: true,
            ..Self::default()
        }
    }

    /// Whether an unexpired rate-limit reset is pending at `now`.
    #[must_use]
    pub fn is_rate_limited_at(&self, now: DateTime<Utc>) -> bool {
        self.rate_limit_reset_at.is_some_and(|reset| now <= reset)
    }

    /// Derive the state machine position at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>, unhealthy_after: u32) -> HealthState {
        if self.is_rate_limited_at(now) {
            HealthState::RateLimited
        } else if !self.healthy || self.consecutive_errors >= unhealthy_after {
            HealthState::Unhealthy
        } else if self.consecutive_failures > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

/// Shared health table for all providers.
#[derive(Debug)]
pub struct HealthTracker {
    inner: Mutex<HashMap<String, ProviderHealth>>,
    unhealthy_after: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UNHEALTHY_AFTER)
    }
}

impl HealthTracker {
    #[must_use]
    pub fn new(unhealthy_after: u32) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProviderHealth>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of one provider's record. Unknown providers are healthy.
    #[must_use]
    pub fn get(&self, provider: &str) -> ProviderHealth {
        self.lock()
            .get(provider)
            .cloned()
            .unwrap_or_else(ProviderHealth::fresh)
    }

    #[must_use]
    pub fn state(&self, provider: &str) -> HealthState {
        self.get(provider).state_at(Utc::now(), self.unhealthy_after)
    }

    #[must_use]
    pub fn is_usable(&self, provider: &str) -> bool {
        self.state(provider).is_usable()
    }

    #[must_use]
    pub fn consecutive_failures(&self, provider: &str) -> u32 {
        self.get(provider).consecutive_failures
    }

    /// Any success returns the provider to `Healthy`.
    pub fn record_success(&self, provider: &str) {
        let mut table = self.lock();
        let entry = table
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::fresh);
        let was_failing = entry.consecutive_failures > 0 || !entry.healthy;
        entry.healthy = true;
        entry.consecutive_failures = 0;
        entry.consecutive_errors = 0;
        entry.rate_limit_reset_at = None;
        entry.last_success_at = Some(Utc::now());
        drop(table);

        if was_failing {
            tracing::info!(provider = %provider, "Provider recovered");
        }
    }

    /// Record a failed call. Rate limits set a reset time; only other
    /// failures count towards the unhealthy threshold.
    pub fn record_failure(&self, provider: &str, error: &PersonaError) {
        let now = Utc::now();
        let mut table = self.lock();
        let entry = table
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::fresh);

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_failure_reason = Some(error.to_string());
        entry.last_failure_at = Some(now);

        if let PersonaError::RateLimited { retry_after, .. } = error {
            let wait = retry_after.unwrap_or(Duration::from_secs(60));
            let wait = chrono::Duration::from_std(wait).unwrap_or(chrono::Duration::seconds(60));
            entry.rate_limit_reset_at = Some(now + wait);
        } else {
            entry.consecutive_errors = entry.consecutive_errors.saturating_add(1);
            if entry.consecutive_errors >= self.unhealthy_after {
                entry.healthy = false;
            }
        }
        let failures = entry.consecutive_failures;
        let healthy = entry.healthy;
        drop(table);

        tracing::warn!(
            provider = %provider,
            failures,
            healthy,
            error_code = error.error_code(),
            "Provider call failed"
        );
    }

    /// Providers currently in the `Unhealthy` state.
    #[must_use]
    pub fn unhealthy_providers(&self) -> Vec<String> {
        let now = Utc::now();
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, h)| h.state_at(now, self.unhealthy_after) == HealthState::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Copy of the full table, sorted by provider name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ProviderHealth, HealthState)> {
        let now = Utc::now();
        let mut rows: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, h)| (name.clone(), h.clone(), h.state_at(now, self.unhealthy_after)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_failure() -> PersonaError {
        PersonaError::ConnectionFailure {
            provider: "p".into(),
            status: Some(500),
            message: "server error".into(),
        }
    }

    fn rate_limited(secs: u64) -> PersonaError {
        PersonaError::RateLimited {
            provider: "p".into(),
            retry_after: Some(Duration::from_secs(secs)),
        }
    }

    #[test]
    fn unknown_provider_is_healthy() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.state("p"), HealthState::Healthy);
        assert!(tracker.get("p").healthy);
    }

    #[test]
    fn failures_degrade_then_mark_unhealthy() {
        let tracker = HealthTracker::new(3);
        tracker.record_failure("p", &conn_failure());
        assert_eq!(tracker.state("p"), HealthState::Degraded);
        assert!(tracker.is_usable("p"));

        tracker.record_failure("p", &conn_failure());
        tracker.record_failure("p", &conn_failure());
        assert_eq!(tracker.state("p"), HealthState::Unhealthy);
        assert!(!tracker.is_usable("p"));
        assert_eq!(tracker.unhealthy_providers(), vec!["p".to_string()]);
    }

    #[test]
    fn rate_limit_sets_future_reset() {
        let tracker = HealthTracker::default();
        tracker.record_failure("p", &rate_limited(5));

        let health = tracker.get("p");
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.rate_limit_reset_at.is_some_and(|t| t > Utc::now()));
        assert_eq!(tracker.state("p"), HealthState::RateLimited);
        assert!(!tracker.is_usable("p"));
    }

    #[test]
    fn rate_limit_expires_on_its_own() {
        let health = ProviderHealth {
            healthy: true,
            consecutive_failures: 1,
            rate_limit_reset_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..ProviderHealth::default()
        };
        assert_eq!(health.state_at(Utc::now(), 3), HealthState::Degraded);
    }

    #[test]
    fn rate_limits_do_not_mark_unhealthy() {
        let tracker = HealthTracker::new(2);
        tracker.record_failure("p", &rate_limited(0));
        tracker.record_failure("p", &rate_limited(0));
        std::thread::sleep(Duration::from_millis(5));

        let health = tracker.get("p");
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.consecutive_errors, 0);
        assert_eq!(tracker.state("p"), HealthState::Degraded);
        assert!(tracker.is_usable("p"));
        assert!(tracker.unhealthy_providers().is_empty());
    }

    #[test]
    fn one_error_after_rate_limits_only_degrades() {
        let tracker = HealthTracker::new(3);
        tracker.record_failure("p", &rate_limited(0));
        tracker.record_failure("p", &rate_limited(0));
        tracker.record_failure("p", &conn_failure());

        let health = tracker.get("p");
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 3);
        assert_eq!(health.consecutive_errors, 1);
        assert_eq!(tracker.state("p"), HealthState::Degraded);

        tracker.record_failure("p", &conn_failure());
        tracker.record_failure("p", &conn_failure());
        assert_eq!(tracker.state("p"), HealthState::Unhealthy);
    }

    #[test]
    fn success_resets_everything() {
        let tracker = HealthTracker::new(1);
        tracker.record_failure("p", &conn_failure());
        tracker.record_failure("p", &rate_limited(30));
        assert!(!tracker.is_usable("p"));

        tracker.record_success("p");
        let health = tracker.get("p");
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.consecutive_errors, 0);
        assert!(health.rate_limit_reset_at.is_none());
        assert!(health.last_success_at.is_some());
        assert_eq!(tracker.state("p"), HealthState::Healthy);
    }

    #[test]
    fn snapshot_is_sorted() {
        let tracker = HealthTracker::default();
        tracker.record_success("zeta");
        tracker.record_failure("alpha", &conn_failure());
        let names: Vec<_> = tracker.snapshot().into_iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
