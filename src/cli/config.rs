//! Config command implementation.
//!
//! Prints the effective configuration. Credentials are never part of the
//! document; each provider's credential variable is listed as set or unset.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::cli::args::{ConfigArgs, OutputFormat};
use crate::error::{ExitCode, PersonaError, Result};
use crate::storage::config::{Config, ENV_CONFIG};

/// Credential variable status for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub provider: String,
    pub env_var: Option<String>,
    pub set: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView<'a> {
    path: String,
    config: &'a Config,
    credentials: Vec<CredentialStatus>,
}

/// Execute the config command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn execute(
    args: &ConfigArgs,
    config: &Config,
    explicit_path: Option<PathBuf>,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    let path = explicit_path
        .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from))
        .unwrap_or_else(Config::config_path);

    if args.path {
        println!("{}", path.display());
        return Ok(ExitCode::Success);
    }

    let credentials = credential_status(config, |var| std::env::var(var).ok());
    match format {
        OutputFormat::Json => {
            let view = ConfigView {
                path: path.display().to_string(),
                config,
                credentials,
            };
            println!("{}", super::to_json(&view, pretty)?);
        }
        OutputFormat::Human => {
            print!("{}", render_human(config, &path, &credentials)?);
        }
    }
    Ok(ExitCode::Success)
}

/// Which credential variables are present, via `lookup`. Empty counts as unset.
#[must_use]
pub fn credential_status<F>(config: &Config, lookup: F) -> Vec<CredentialStatus>
where
    F: Fn(&str) -> Option<String>,
{
    config
        .providers
        .iter()
        .map(|(name, settings)| {
            let env_var = settings.credential_env_var.clone();
            let set = env_var
                .as_deref()
                .and_then(&lookup)
                .is_some_and(|v| !v.trim().is_empty());
            CredentialStatus {
                provider: name.clone(),
                env_var,
                set,
            }
        })
        .collect()
}

/// TOML document plus a credential summary.
///
/// # Errors
///
/// Returns a config error if the document cannot be rendered as TOML.
pub fn render_human(
    config: &Config,
    path: &std::path::Path,
    credentials: &[CredentialStatus],
) -> Result<String> {
    let document = toml::to_string_pretty(config)
        .map_err(|e| PersonaError::Config(format!("cannot render configuration: {e}")))?;

    let mut out = String::new();
    let _ = writeln!(out, "# Config file: {}", path.display());
    let _ = writeln!(out, "{document}");
    let _ = writeln!(out, "# Credentials");
    for status in credentials {
        let value = match (&status.env_var, status.set) {
            (None, _) => "not required".to_string(),
            (Some(var), true) => format!("{var} (set)"),
            (Some(var), false) => format!("{var} (unset)"),
        };
        let _ = writeln!(out, "#   {:<12} {value}", status.provider);
    }
    Ok(out)
}
