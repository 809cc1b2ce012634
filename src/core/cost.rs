//! Rolling token-usage ledger and spend thresholds.
//!
//! Every priced provider call appends a [`TokenUsageRecord`]. Records older
//! than 24 hours are pruned as part of each append.
//!
//! Admission reserves the estimated cost of a request in the same critical
//! section that checks the limits. Outstanding reservations count as spend
//! until the request's usage is recorded against them or they are dropped,
//! so concurrent requests cannot all pass the check on the same headroom.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::pricing::PricingTable;
use crate::error::{PersonaError, QuotaType, Result};
use crate::storage::config::CostSettings;

/// Fraction of a limit at which a warning is raised.
pub const WARNING_RATIO: f64 = 0.8;

/// Rough token estimate for text the provider did not meter.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

// =============================================================================
// Records
// =============================================================================

/// One metered provider call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl TokenUsageRecord {
    /// Build a record stamped now.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        estimated_cost: f64,
    ) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost,
            provider: provider.into(),
            model: model.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Spend limits in USD. A zero limit disables that check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostThresholds {
    pub hourly_limit: f64,
    pub daily_limit: f64,
    pub per_request_limit: f64,
}

impl From<&CostSettings> for CostThresholds {
    fn from(settings: &CostSettings) -> Self {
        Self {
            hourly_limit: settings.hourly_limit,
            daily_limit: settings.daily_limit,
            per_request_limit: settings.per_request_limit,
        }
    }
}

impl Default for CostThresholds {
    fn default() -> Self {
        Self::from(&CostSettings::default())
    }
}

/// Aggregation window for [`CostTracker::get_costs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostWindow {
    LastHour,
    LastDay,
}

impl CostWindow {
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::LastHour => Duration::hours(1),
            Self::LastDay => Duration::hours(24),
        }
    }

    const fn quota_type(self) -> QuotaType {
        match self {
            Self::LastHour => QuotaType::Hourly,
            Self::LastDay => QuotaType::Daily,
        }
    }
}

/// Totals over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub per_provider_cost: BTreeMap<String, f64>,
    pub request_count: usize,
}

/// One window that crossed the warning or exceeded line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdEntry {
    #[serde(serialize_with = "serialize_quota_type")]
    pub quota_type: QuotaType,
    pub spent: f64,
    pub limit: f64,
}

fn serialize_quota_type<S: serde::Serializer>(
    quota: &QuotaType,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(quota.as_str())
}

impl ThresholdEntry {
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "{} spend ${:.4} of ${:.2} limit ({:.0}%)",
            self.quota_type,
            self.spent,
            self.limit,
            self.spent / self.limit * 100.0
        )
    }
}

/// Result of [`CostTracker::check_thresholds`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdReport {
    pub within_limits: bool,
    pub warnings: Vec<ThresholdEntry>,
    pub exceeded: Vec<ThresholdEntry>,
}

// =============================================================================
// Reservations
// =============================================================================

/// Cost held for an admitted request. Dropping it releases whatever part of
/// the hold has not been settled by recorded usage.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it immediately"]
pub struct CostReservation<'a> {
    tracker: &'a CostTracker,
    id: u64,
}

impl CostReservation<'_> {
    /// Part of the hold not yet covered by recorded usage.
    #[must_use]
    pub fn remaining(&self) -> f64 {
        self.tracker
            .lock()
            .reservations
            .get(&self.id)
            .copied()
            .unwrap_or(0.0)
    }
}

impl Drop for CostReservation<'_> {
    fn drop(&mut self) {
        self.tracker.lock().reservations.remove(&self.id);
    }
}

/// A successful admission: the hold plus the threshold state including it.
#[derive(Debug)]
pub struct Admission<'a> {
    pub reservation: CostReservation<'a>,
    pub report: ThresholdReport,
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<TokenUsageRecord>,
    reservations: HashMap<u64, f64>,
    next_reservation: u64,
}

impl Ledger {
    fn reserved(&self) -> f64 {
        self.reservations.values().sum()
    }
}

/// Shared cost ledger.
#[derive(Debug)]
pub struct CostTracker {
    ledger: Mutex<Ledger>,
    thresholds: CostThresholds,
    pricing: PricingTable,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(CostThresholds::default(), PricingTable::default())
    }
}

impl CostTracker {
    #[must_use]
    pub fn new(thresholds: CostThresholds, pricing: PricingTable) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            thresholds,
            pricing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn thresholds(&self) -> &CostThresholds {
        &self.thresholds
    }

    #[must_use]
    pub const fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Append a record, prune anything older than 24 hours, and return the
    /// threshold state including the new record.
    pub fn record_usage(&self, record: TokenUsageRecord) -> ThresholdReport {
        self.record_usage_against(record, None)
    }

    /// [`record_usage`](Self::record_usage), settling the record's cost
    /// against `reservation` in the same critical section.
    pub fn record_usage_against(
        &self,
        record: TokenUsageRecord,
        reservation: Option<&CostReservation<'_>>,
    ) -> ThresholdReport {
        let now = Utc::now();
        let mut ledger = self.lock();
        tracing::debug!(
            provider = %record.provider,
            model = %record.model,
            tokens = record.total_tokens,
            cost = record.estimated_cost,
            "Recorded token usage"
        );
        if let Some(reservation) = reservation.filter(|r| std::ptr::eq(r.tracker, self))
            && let Some(held) = ledger.reservations.get_mut(&reservation.id)
        {
            *held = (*held - record.estimated_cost).max(0.0);
        }
        ledger.records.push(record);
        let cutoff = now - CostWindow::LastDay.duration();
        ledger.records.retain(|r| r.timestamp >= cutoff);
        self.evaluate(&ledger, now, 0.0)
    }

    /// Totals for `window`, ending now. Reservations are not spend yet and
    /// are left out.
    #[must_use]
    pub fn get_costs(&self, window: CostWindow) -> CostSummary {
        summarize(&self.lock().records, Utc::now() - window.duration())
    }

    /// Evaluate the hourly and daily limits, counting outstanding
    /// reservations as spent.
    #[must_use]
    pub fn check_thresholds(&self) -> ThresholdReport {
        self.evaluate(&self.lock(), Utc::now(), 0.0)
    }

    /// Admit a request expected to cost `estimated_cost` and reserve that
    /// amount until the returned reservation is dropped.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` when the estimate is over the per-request
    /// limit, or when recorded spend plus outstanding reservations plus the
    /// estimate would exceed a window limit. On success the report carries
    /// any warnings.
    pub fn admit(&self, estimated_cost: f64) -> Result<Admission<'_>> {
        let limit = self.thresholds.per_request_limit;
        if limit > 0.0 && estimated_cost > limit {
            return Err(PersonaError::QuotaExceeded {
                quota_type: QuotaType::PerRequest,
                detail: format!("estimated ${estimated_cost:.4} > ${limit:.2}"),
            });
        }

        let estimated_cost = estimated_cost.max(0.0);
        let mut ledger = self.lock();
        let report = self.evaluate(&ledger, Utc::now(), estimated_cost);
        if let Some(entry) = report.exceeded.first() {
            return Err(PersonaError::QuotaExceeded {
                quota_type: entry.quota_type,
                detail: entry.message(),
            });
        }

        let id = ledger.next_reservation;
        ledger.next_reservation += 1;
        ledger.reservations.insert(id, estimated_cost);
        drop(ledger);

        Ok(Admission {
            reservation: CostReservation { tracker: self, id },
            report,
        })
    }

    /// Total cost currently held by outstanding reservations.
    #[must_use]
    pub fn reserved(&self) -> f64 {
        self.lock().reserved()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Threshold state with reservations and `pending` counted as spent.
    fn evaluate(&self, ledger: &Ledger, now: DateTime<Utc>, pending: f64) -> ThresholdReport {
        let mut report = ThresholdReport {
            within_limits: true,
            ..ThresholdReport::default()
        };

        for (window, limit) in [
            (CostWindow::LastHour, self.thresholds.hourly_limit),
            (CostWindow::LastDay, self.thresholds.daily_limit),
        ] {
            if limit <= 0.0 {
                continue;
            }
            let spent = summarize(&ledger.records, now - window.duration()).total_cost
                + ledger.reserved()
                + pending;
            let entry = ThresholdEntry {
                quota_type: window.quota_type(),
                spent,
                limit,
            };
            if spent > limit {
                report.exceeded.push(entry);
            } else if spent > limit * WARNING_RATIO {
                report.warnings.push(entry);
            }
        }

        report.within_limits = report.exceeded.is_empty();
        report
    }
}

fn summarize(ledger: &[TokenUsageRecord], since: DateTime<Utc>) -> CostSummary {
    let mut summary = CostSummary::default();
    for record in ledger.iter().filter(|r| r.timestamp >= since) {
        summary.total_cost += record.estimated_cost;
        summary.total_tokens += record.total_tokens;
        summary.request_count += 1;
        *summary
            .per_provider_cost
            .entry(record.provider.clone())
            .or_insert(0.0) += record.estimated_cost;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn tracker(hourly: f64, daily: f64) -> CostTracker {
        CostTracker::new(
            CostThresholds {
                hourly_limit: hourly,
                daily_limit: daily,
                per_request_limit: 1.0,
            },
            PricingTable::empty(),
        )
    }

    fn spend(provider: &str, cost: f64) -> TokenUsageRecord {
        TokenUsageRecord::new(provider, "m", 100, 50, cost)
    }

    #[test]
    fn record_sums_tokens() {
        let record = spend("p", 0.1);
        assert_eq!(record.total_tokens, 150);
    }

    #[test]
    fn get_costs_aggregates_per_provider() {
        let tracker = tracker(100.0, 1_000.0);
        tracker.record_usage(spend("openai", 0.25));
        tracker.record_usage(spend("openai", 0.25));
        tracker.record_usage(spend("anthropic", 1.0));

        let summary = tracker.get_costs(CostWindow::LastHour);
        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.total_tokens, 450);
        assert!((summary.total_cost - 1.5).abs() < 1e-9);
        assert!((summary.per_provider_cost["openai"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn hourly_window_excludes_older_records() {
        let tracker = tracker(100.0, 1_000.0);
        tracker.record_usage(spend("p", 2.0).at(Utc::now() - Duration::hours(2)));
        tracker.record_usage(spend("p", 1.0));

        assert!((tracker.get_costs(CostWindow::LastHour).total_cost - 1.0).abs() < 1e-9);
        assert!((tracker.get_costs(CostWindow::LastDay).total_cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn records_older_than_a_day_are_pruned_on_append() {
        let tracker = tracker(100.0, 1_000.0);
        tracker.record_usage(spend("p", 5.0).at(Utc::now() - Duration::hours(25)));
        assert_eq!(tracker.len(), 0, "stale record is pruned by its own append");

        tracker.record_usage(spend("p", 1.0));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn eighty_one_percent_warns_but_stays_within_limits() {
        let tracker = tracker(10.0, 1_000.0);
        tracker.record_usage(spend("p", 8.1));

        let report = tracker.check_thresholds();
        assert!(report.within_limits);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].quota_type, QuotaType::Hourly);
        assert!(report.exceeded.is_empty());
    }

    #[test]
    fn one_hundred_one_percent_exceeds() {
        let tracker = tracker(10.0, 1_000.0);
        let report = tracker.record_usage(spend("p", 10.1));

        assert!(!report.within_limits);
        assert_eq!(report.exceeded.len(), 1);
        assert_eq!(report.exceeded[0].quota_type, QuotaType::Hourly);
        assert!(report.warnings.is_empty(), "exceeded replaces the warning");
    }

    #[test]
    fn zero_limits_are_disabled() {
        let tracker = tracker(0.0, 0.0);
        tracker.record_usage(spend("p", 500.0));
        assert!(tracker.check_thresholds().within_limits);
    }

    #[test]
    fn admit_rejects_expensive_requests() {
        let tracker = tracker(10.0, 100.0);
        let err = tracker.admit(2.0).unwrap_err();
        assert!(matches!(
            err,
            PersonaError::QuotaExceeded {
                quota_type: QuotaType::PerRequest,
                ..
            }
        ));
    }

    #[test]
    fn admit_rejects_estimate_that_would_cross_window_limit() {
        let tracker = tracker(1.0, 100.0);
        tracker.record_usage(spend("p", 0.7));
        let err = tracker.admit(0.4).unwrap_err();
        assert!(matches!(
            err,
            PersonaError::QuotaExceeded {
                quota_type: QuotaType::Hourly,
                ..
            }
        ));
        assert!(tracker.admit(0.3).is_ok());
    }

    #[test]
    fn reservation_holds_headroom_until_dropped() {
        let tracker = tracker(1.0, 100.0);
        let first = tracker.admit(0.6).unwrap();
        assert!((tracker.reserved() - 0.6).abs() < 1e-9);
        assert!(tracker.admit(0.6).is_err(), "headroom is already held");

        drop(first);
        assert!(tracker.reserved().abs() < 1e-9);
        assert!(tracker.admit(0.6).is_ok());
    }

    #[test]
    fn recorded_usage_settles_reservation() {
        let tracker = tracker(1.0, 100.0);
        let admission = tracker.admit(0.5).unwrap();
        tracker.record_usage_against(spend("p", 0.2), Some(&admission.reservation));

        assert!((admission.reservation.remaining() - 0.3).abs() < 1e-9);
        assert!((tracker.reserved() - 0.3).abs() < 1e-9);
        // 0.2 spent + 0.3 held leaves room for 0.5, not 0.6.
        assert!(tracker.admit(0.6).is_err());

        drop(admission);
        assert!(tracker.reserved().abs() < 1e-9);
        assert!((tracker.get_costs(CostWindow::LastHour).total_cost - 0.2).abs() < 1e-9);
        assert!(tracker.admit(0.6).is_ok());
    }

    #[test]
    fn usage_over_reservation_floors_at_zero() {
        let tracker = tracker(10.0, 100.0);
        let admission = tracker.admit(0.1).unwrap();
        tracker.record_usage_against(spend("p", 0.4), Some(&admission.reservation));
        assert!(admission.reservation.remaining().abs() < 1e-9);
        assert!((tracker.reserved()).abs() < 1e-9);
    }

    #[test]
    fn reservation_from_another_tracker_is_ignored() {
        let tracker_a = tracker(10.0, 100.0);
        let tracker_b = tracker(10.0, 100.0);
        let admission = tracker_a.admit(0.5).unwrap();
        tracker_b.record_usage_against(spend("p", 0.2), Some(&admission.reservation));
        assert!((admission.reservation.remaining() - 0.5).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_cannot_overcommit() {
        let tracker = Arc::new(tracker(1.0, 100.0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    let admission = tracker.admit(0.3).ok();
                    // Hold every reservation until all eight have tried.
                    barrier.wait().await;
                    admission.is_some()
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert!(tracker.reserved().abs() < 1e-9);
    }

    #[test]
    fn admit_rejects_when_window_exceeded() {
        let tracker = tracker(1.0, 100.0);
        tracker.record_usage(spend("p", 1.5));
        let err = tracker.admit(0.01).unwrap_err();
        assert!(matches!(
            err,
            PersonaError::QuotaExceeded {
                quota_type: QuotaType::Hourly,
                ..
            }
        ));
    }

    #[test]
    fn admit_passes_warnings_through() {
        let tracker = tracker(1.0, 100.0);
        tracker.record_usage(spend("p", 0.9));
        let admission = tracker.admit(0.01).unwrap();
        assert_eq!(admission.report.warnings.len(), 1);
        assert!(admission.report.warnings[0].message().contains("hourly"));
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
