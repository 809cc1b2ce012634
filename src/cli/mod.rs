//! CLI argument parsing and command dispatch.

pub mod args;
pub mod config;
pub mod providers;
pub mod research;

use std::path::Path;

pub use args::{Cli, Commands, OutputFormat};

use crate::error::{PersonaError, Result};
use crate::storage::config::Config;

/// Load the effective config, from `path` when given.
///
/// An explicit path must exist; the default location may be absent.
///
/// # Errors
///
/// Returns a config error if the file is missing, unparsable or invalid.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Config::resolve();
    };
    if !path.exists() {
        return Err(PersonaError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let mut config = Config::load_from(path)?;
    config.apply_env_overrides(|var| std::env::var(var).ok())?;
    config.validate()?;
    Ok(config)
}

/// Serialize `value` as JSON, pretty or compact.
pub(crate) fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestDir;

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = TestDir::new();
        let err = load_config(Some(&dir.file_path("absent.toml"))).unwrap_err();
        assert!(matches!(err, PersonaError::Config(_)));
    }

    #[test]
    fn explicit_path_is_loaded_and_validated() {
        let dir = TestDir::new();
        dir.create_file("config.toml", "default_provider = \"nope\"\n");
        let err = load_config(Some(&dir.file_path("config.toml"))).unwrap_err();
        crate::assert_contains!(err.to_string(), "nope");
    }

    #[test]
    fn explicit_valid_file_overrides_defaults() {
        let dir = TestDir::new();
        dir.create_file(
            "config.toml",
            "default_provider = \"anthropic\"\nfallback_providers = [\"openai\"]\n",
        );
        let config = load_config(Some(&dir.file_path("config.toml"))).unwrap();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.fallback_providers, vec!["openai".to_string()]);
    }
}
