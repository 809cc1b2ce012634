//! Configuration file loading and validation.
//!
//! Loads configuration from:
//! - Linux: `~/.config/persona/config.toml`
//! - macOS: `~/Library/Application Support/dev.persona.persona/config.toml`
//! - Windows: `%APPDATA%/persona/persona/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. Environment variables
//! 2. Config file
//! 3. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `PERSONA_CONFIG`: Override config file path
//! - `PERSONA_DEFAULT_PROVIDER`: Default provider name
//! - `PERSONA_CALL_TIMEOUT`: Per-call provider timeout in seconds
//! - `PERSONA_CACHE_TYPE`: Cache backend (memory, file, remote)
//!
//! Credentials are never stored in the file; each provider names the
//! environment variable that holds its key.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::provider::{ProviderKind, RateLimits};
use crate::error::{PersonaError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "PERSONA_CONFIG";
/// Environment variable for the default provider.
pub const ENV_DEFAULT_PROVIDER: &str = "PERSONA_DEFAULT_PROVIDER";
/// Environment variable for the per-call timeout in seconds.
pub const ENV_CALL_TIMEOUT: &str = "PERSONA_CALL_TIMEOUT";
/// Environment variable for the cache backend type.
pub const ENV_CACHE_TYPE: &str = "PERSONA_CACHE_TYPE";

/// Bounds for `limits.call_timeout_seconds`.
const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

// =============================================================================
// Config File Structure
// =============================================================================

/// Configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider tried after an explicitly requested one.
    pub default_provider: String,
    /// Ordered fallback providers.
    pub fallback_providers: Vec<String>,
    /// Provider definitions keyed by name.
    pub providers: BTreeMap<String, ProviderSettings>,
    pub retry: RetrySettings,
    pub costs: CostSettings,
    pub cache: CacheSettings,
    pub limits: LimitSettings,
    /// Per-model price overrides layered over the built-in table.
    pub pricing: Vec<PricingOverride>,
}

/// One `[providers.<name>]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API family; inferred from the provider name when absent.
    pub kind: Option<ProviderKind>,
    /// Environment variable holding the API key. Absent means no key needed.
    pub credential_env_var: Option<String>,
    pub base_url: Option<String>,
    pub models: Vec<String>,
    pub default_model: Option<String>,
    pub rate_limits: RateLimits,
}

/// `[retry]` section. Applies to a single provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// `[costs]` section, in USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    pub hourly_limit: f64,
    pub daily_limit: f64,
    pub per_request_limit: f64,
}

/// Cache backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    File,
    #[serde(alias = "redis")]
    Remote,
}

impl CacheBackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Remote => "remote",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "file" => Some(Self::File),
            "remote" | "redis" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub backend: CacheBackendKind,
    /// Capacity of the memory and file backends.
    pub max_size: usize,
    pub cleanup_interval_seconds: u64,
    pub ttl_hours: u64,
    /// File backend directory; defaults to the platform cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Remote backend URL (e.g. `redis://localhost:6379`).
    pub connection_url: Option<String>,
    pub key_prefix: String,
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_concurrent_calls: usize,
    pub call_timeout_seconds: u64,
    pub unhealthy_after_failures: u32,
    pub health_probe_interval_seconds: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// One `[[pricing]]` entry, per-1K-token USD rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverride {
    pub provider: String,
    pub model: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

// =============================================================================
// Defaults
// =============================================================================

fn provider(kind: ProviderKind, env: Option<&str>, models: &[&str]) -> ProviderSettings {
    ProviderSettings {
        kind: Some(kind),
        credential_env_var: env.map(str::to_string),
        base_url: None,
        models: models.iter().map(|m| (*m).to_string()).collect(),
        default_model: models.first().map(|m| (*m).to_string()),
        rate_limits: RateLimits::default(),
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "openai".to_string(),
            provider(
                ProviderKind::OpenAi,
                Some("OPENAI_API_KEY"),
                &["gpt-4o-mini", "gpt-4o"],
            ),
        );
        providers.insert(
            "anthropic".to_string(),
            provider(
                ProviderKind::Anthropic,
                Some("ANTHROPIC_API_KEY"),
                &["claude-3-5-haiku-latest", "claude-3-5-sonnet-latest"],
            ),
        );
        providers.insert(
            "gemini".to_string(),
            provider(
                ProviderKind::Gemini,
                Some("GEMINI_API_KEY"),
                &["gemini-1.5-flash", "gemini-1.5-pro"],
            ),
        );
        providers.insert(
            "ollama".to_string(),
            provider(ProviderKind::Ollama, None, &["llama3.1"]),
        );

        Self {
            default_provider: "openai".to_string(),
            fallback_providers: vec![
                "anthropic".to_string(),
                "gemini".to_string(),
                "ollama".to_string(),
            ],
            providers,
            retry: RetrySettings::default(),
            costs: CostSettings::default(),
            cache: CacheSettings::default(),
            limits: LimitSettings::default(),
            pricing: Vec::new(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            hourly_limit: 10.0,
            daily_limit: 100.0,
            per_request_limit: 1.0,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            max_size: 1_000,
            cleanup_interval_seconds: 300,
            ttl_hours: 24,
            cache_dir: None,
            connection_url: None,
            key_prefix: "persona:".to_string(),
        }
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            call_timeout_seconds: 30,
            unhealthy_after_failures: 3,
            health_probe_interval_seconds: 300,
            max_tokens: 2_000,
            temperature: 0.7,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3_600)
    }

    /// Directory for the file backend.
    #[must_use]
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| AppPaths::new().response_cache_dir())
    }
}

impl LimitSettings {
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Load the effective configuration: file (or `PERSONA_CONFIG`), then
    /// environment overrides, then validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid, or if the merged
    /// configuration fails validation.
    pub fn resolve() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG).map_or_else(|_| Self::config_path(), PathBuf::from);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific path. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigParse` if the file cannot be parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PersonaError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Get the default config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Apply `PERSONA_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if an override value cannot be parsed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_DEFAULT_PROVIDER).filter(|v| !v.trim().is_empty()) {
            self.default_provider = name.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_CALL_TIMEOUT) {
            self.limits.call_timeout_seconds = raw.trim().parse().map_err(|_| {
                PersonaError::Config(format!("{ENV_CALL_TIMEOUT} must be a number of seconds, got \"{raw}\""))
            })?;
        }

        if let Some(raw) = lookup(ENV_CACHE_TYPE) {
            self.cache.backend = CacheBackendKind::parse(&raw).ok_or_else(|| {
                PersonaError::Config(format!(
                    "{ENV_CACHE_TYPE} must be memory, file or remote, got \"{raw}\""
                ))
            })?;
        }

        Ok(())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let known = || self.providers.keys().cloned().collect::<Vec<_>>().join(", ");

        if !self.providers.contains_key(&self.default_provider) {
            return Err(PersonaError::Config(format!(
                "default_provider \"{}\" is not configured. Configured providers: {}",
                self.default_provider,
                known()
            )));
        }
        for name in &self.fallback_providers {
            if !self.providers.contains_key(name) {
                return Err(PersonaError::Config(format!(
                    "fallback provider \"{name}\" is not configured. Configured providers: {}",
                    known()
                )));
            }
        }

        for (name, settings) in &self.providers {
            if let Some(model) = &settings.default_model
                && !settings.models.is_empty()
                && !settings.models.contains(model)
            {
                return Err(PersonaError::Config(format!(
                    "providers.{name}.default_model \"{model}\" is not in its models list"
                )));
            }
        }

        if !TIMEOUT_RANGE.contains(&self.limits.call_timeout_seconds) {
            return Err(PersonaError::Config(
                "limits.call_timeout_seconds must be between 1 and 300".to_string(),
            ));
        }
        if self.limits.max_concurrent_calls == 0 {
            return Err(PersonaError::Config(
                "limits.max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PersonaError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        for (key, value) in [
            ("hourly_limit", self.costs.hourly_limit),
            ("daily_limit", self.costs.daily_limit),
            ("per_request_limit", self.costs.per_request_limit),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PersonaError::Config(format!(
                    "costs.{key} must be a non-negative number"
                )));
            }
        }

        match self.cache.backend {
            CacheBackendKind::Memory if self.cache.max_size == 0 => {
                return Err(PersonaError::Config(
                    "cache.max_size must be at least 1 for the memory backend".to_string(),
                ));
            }
            CacheBackendKind::Remote if self.cache.connection_url.is_none() => {
                return Err(PersonaError::Config(
                    "cache.connection_url is required for the remote backend".to_string(),
                ));
            }
            _ => {}
        }
        if self.cache.ttl_hours == 0 {
            return Err(PersonaError::Config(
                "cache.ttl_hours must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
