//! Research command implementation.

use std::fmt::Write as _;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{OutputFormat, ResearchArgs};
use crate::core::cost::CostWindow;
use crate::core::research::{ResearchOrchestrator, ResearchResult, ResearchStatus};
use crate::error::{ExitCode, Result};
use crate::storage::config::Config;
use crate::util::{format_cost, format_tokens};

/// Execute the research command. Ctrl-C cancels the request in flight.
///
/// # Errors
///
/// Returns an error if the orchestrator cannot be built or output cannot be
/// serialized. Research failures are reported in the output instead.
pub async fn execute(
    args: &ResearchArgs,
    config: &Config,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    let orchestrator = ResearchOrchestrator::from_config(config, None)?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = orchestrator
        .research_with_cancel(&args.description, args.provider.as_deref(), &cancel)
        .await;
    watcher.abort();

    match format {
        OutputFormat::Json => println!("{}", super::to_json(&result, pretty)?),
        OutputFormat::Human => {
            print!("{}", render_human(&result));
            let spend = orchestrator.cost_summary(CostWindow::LastHour);
            if spend.request_count > 0 {
                println!(
                    "\nSpend: {} over {} call(s), {} tokens",
                    format_cost(spend.total_cost),
                    spend.request_count,
                    format_tokens(spend.total_tokens)
                );
            }
        }
    }

    Ok(exit_code(&result))
}

/// Process exit code for a finished request.
#[must_use]
pub const fn exit_code(result: &ResearchResult) -> ExitCode {
    match result.status {
        ResearchStatus::Found => ExitCode::Success,
        ResearchStatus::NoProfilesFound => ExitCode::NoProfiles,
        ResearchStatus::Cancelled => ExitCode::GeneralError,
    }
}

/// Human-readable rendering of a result.
#[must_use]
pub fn render_human(result: &ResearchResult) -> String {
    let mut out = String::new();

    for profile in &result.profiles {
        let d = &profile.descriptor;
        let _ = write!(out, "{} ({})", d.name, d.kind.as_str());
        let _ = write!(out, "  confidence {:.2}", profile.confidence);
        match (&profile.provider, &profile.model) {
            (Some(provider), Some(model)) => {
                let _ = write!(out, "  via {provider}/{model}");
            }
            (Some(provider), None) => {
                let _ = write!(out, "  via {provider}");
            }
            _ => {}
        }
        let _ = writeln!(out, "  [{}]", profile.quality);

        if let Some(description) = &d.description {
            let _ = writeln!(out, "  {description}");
        }
        let style = &d.communication_style;
        let _ = writeln!(
            out,
            "  Style: {}, {}, {} ({})",
            style.formality.as_str(),
            style.verbosity.as_str(),
            style.technical_level.as_str(),
            style.tone
        );
        if !d.traits.is_empty() {
            let _ = writeln!(out, "  Traits:");
            for t in &d.traits {
                let _ = writeln!(out, "    {} ({}/10)", t.name, t.intensity);
            }
        }
        if !d.mannerisms.is_empty() {
            let _ = writeln!(out, "  Mannerisms: {}", d.mannerisms.join("; "));
        }
    }

    if result.status == ResearchStatus::Cancelled {
        let _ = writeln!(out, "Cancelled.");
    }

    section(&mut out, "Warnings", "!", &result.warnings);
    let errors: Vec<String> = result
        .errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect();
    section(&mut out, "Errors", "x", &errors);
    section(&mut out, "Suggestions", "-", &result.suggestions);
    out
}

fn section(out: &mut String, title: &str, bullet: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{title}:");
    for line in lines {
        let _ = writeln!(out, "  {bullet} {line}");
    }
}
