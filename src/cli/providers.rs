//! Providers command implementation.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::args::{OutputFormat, ProvidersArgs};
use crate::core::health::HealthState;
use crate::core::manager::ProviderManager;
use crate::core::research::ResearchOrchestrator;
use crate::error::{ExitCode, Result};
use crate::storage::config::Config;
use crate::util::format_reset_countdown;

/// One row of the providers table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRow {
    pub name: String,
    pub kind: String,
    pub default_model: String,
    pub models: Vec<String>,
    /// `set`, `unset` or `not required`.
    pub credential: &'static str,
    pub available: bool,
    pub state: HealthState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    /// Outcome of `--check`: `ok` or the error line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

/// Execute the providers command.
///
/// # Errors
///
/// Returns an error if the provider services cannot be built.
pub async fn execute(
    args: &ProvidersArgs,
    config: &Config,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    let orchestrator = ResearchOrchestrator::from_config(config, None)?;
    let manager = orchestrator.manager();

    let checks = if args.check {
        manager.check_connections().await
    } else {
        Vec::new()
    };
    let rows = collect_rows(manager, &checks);

    match format {
        OutputFormat::Json => println!("{}", super::to_json(&rows, pretty)?),
        OutputFormat::Human => print!("{}", render_human(&rows, Utc::now())),
    }

    let failed = checks.iter().any(|(_, outcome)| outcome.is_err());
    Ok(if failed {
        ExitCode::GeneralError
    } else {
        ExitCode::Success
    })
}

/// Build rows in registry order, merging health and any check results.
#[must_use]
pub fn collect_rows(
    manager: &ProviderManager,
    checks: &[(String, Result<()>)],
) -> Vec<ProviderRow> {
    let health = manager.health();
    manager
        .registry()
        .iter()
        .map(|d| {
            let record = health.get(&d.name);
            let credential = match (&d.credential_env_var, d.credential_present) {
                (None, _) => "not required",
                (Some(_), true) => "set",
                (Some(_), false) => "unset",
            };
            let check = checks
                .iter()
                .find(|(name, _)| *name == d.name)
                .map(|(_, outcome)| match outcome {
                    Ok(()) => "ok".to_string(),
                    Err(err) => err.to_report_line(),
                });
            ProviderRow {
                name: d.name.clone(),
                kind: d.kind.as_str().to_string(),
                default_model: d.default_model.clone(),
                models: d.models.clone(),
                credential,
                available: d.is_available(),
                state: health.state(&d.name),
                consecutive_failures: record.consecutive_failures,
                rate_limit_reset_at: record.rate_limit_reset_at,
                last_failure_reason: record.last_failure_reason,
                check,
            }
        })
        .collect()
}

/// Human-readable table.
#[must_use]
pub fn render_human(rows: &[ProviderRow], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<10} {:<26} {:<13} {:<12} {}",
        "Provider", "Kind", "Default model", "Credential", "Health", "Notes"
    );
    let _ = writeln!(out, "{:-<12} {:-<10} {:-<26} {:-<13} {:-<12} {:-<20}", "", "", "", "", "", "");

    for row in rows {
        let mut notes = Vec::new();
        if row.consecutive_failures > 0 {
            notes.push(format!("{} failure(s)", row.consecutive_failures));
        }
        if let Some(reset) = row.rate_limit_reset_at
            && reset > now
        {
            notes.push(format!("resets in {}", format_reset_countdown(reset, now)));
        }
        if let Some(check) = &row.check {
            notes.push(format!("check: {check}"));
        }
        let _ = writeln!(
            out,
            "{:<12} {:<10} {:<26} {:<13} {:<12} {}",
            row.name,
            row.kind,
            row.default_model,
            row.credential,
            row.state.as_str(),
            notes.join(", ")
        );
    }
    out
}
