//! Number and time formatting for CLI output.

use chrono::{DateTime, Utc};

/// Format a cost in USD.
///
/// Per-request LLM spend is usually well under a cent, so small values keep
/// four decimals.
#[must_use]
pub fn format_cost(value: f64) -> String {
    if value != 0.0 && value.abs() < 0.01 {
        format!("${value:.4}")
    } else {
        format!("${value:.2}")
    }
}

/// Format a token count compactly (`12.5K`, `1.5M`).
#[must_use]
pub fn format_tokens(value: u64) -> String {
    fn compact(value: u64, divisor: u64, suffix: &str) -> String {
        let major = value / divisor;
        let minor = (value % divisor) / (divisor / 10);
        format!("{major}.{minor}{suffix}")
    }

    if value >= 1_000_000 {
        compact(value, 1_000_000, "M")
    } else if value >= 1_000 {
        compact(value, 1_000, "K")
    } else {
        value.to_string()
    }
}

/// Format the time left until a rate-limit reset relative to `now`.
#[must_use]
pub fn format_reset_countdown(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = reset_at.signed_duration_since(now);
    let secs = remaining.num_seconds();
    if secs <= 0 {
        return "now".to_string();
    }

    let minutes = secs / 60;
    if minutes >= 60 {
        format!("in {}h {}m", minutes / 60, minutes % 60)
    } else if minutes > 0 {
        format!("in {minutes}m {}s", secs % 60)
    } else {
        format!("in {secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_cost_small_values_keep_precision() {
        assert_eq!(format_cost(0.0015), "$0.0015");
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(12.5), "$12.50");
    }

    #[test]
    fn format_tokens_millions() {
        assert_eq!(format_tokens(1_500_000), "1.5M");
    }

    #[test]
    fn format_tokens_thousands() {
        assert_eq!(format_tokens(12_500), "12.5K");
    }

    #[test]
    fn format_tokens_small() {
        assert_eq!(format_tokens(500), "500");
    }

    #[test]
    fn reset_countdown_buckets() {
        let now = Utc::now();
        assert_eq!(format_reset_countdown(now - Duration::seconds(5), now), "now");
        assert_eq!(format_reset_countdown(now + Duration::seconds(42), now), "in 42s");
        assert_eq!(format_reset_countdown(now + Duration::seconds(125), now), "in 2m 5s");
        assert_eq!(format_reset_countdown(now + Duration::minutes(90), now), "in 1h 30m");
    }
}
