//! Provider descriptors and registry.
//!
//! The registry is built once at boot from the configuration document and the
//! process environment, and is read-only afterwards. Credentials are kept in a
//! side table of [`Secret`]s so descriptors can be logged and serialized
//! freely.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{PersonaError, Result};
use crate::storage::config::Config;

// =============================================================================
// Provider Kind
// =============================================================================

/// Provider API family. Selects which capability client speaks to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    OpenRouter,
    /// Any other endpoint speaking the OpenAI chat-completions dialect.
    Compatible,
}

impl ProviderKind {
    /// Infer the API family from a configured provider name.
    #[must_use]
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("anthropic") || lower.contains("claude") {
            Self::Anthropic
        } else if lower.contains("gemini") || lower.contains("google") {
            Self::Gemini
        } else if lower.contains("ollama") {
            Self::Ollama
        } else if lower.contains("openrouter") {
            Self::OpenRouter
        } else if lower.contains("openai") {
            Self::OpenAi
        } else {
            Self::Compatible
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::Compatible => "compatible",
        }
    }

    /// Default API base URL when the config does not set one.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Compatible => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::Ollama => "http://localhost:11434/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Default model when the config lists none.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Compatible => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::Gemini => "gemini-1.5-flash",
            Self::Ollama => "llama3.1",
            Self::OpenRouter => "openai/gpt-4o-mini",
        }
    }

    /// Whether this family speaks the OpenAI chat-completions dialect.
    #[must_use]
    pub const fn is_openai_compatible(self) -> bool {
        matches!(
            self,
            Self::OpenAi | Self::Ollama | Self::OpenRouter | Self::Compatible
        )
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// A credential value that never prints itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only provider clients building request headers call this.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// Per-provider request/token budgets. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

/// Static description of one provider, fixed at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    /// Environment variable holding the credential, if one is needed.
    pub credential_env_var: Option<String>,
    pub credential_present: bool,
    pub base_url: String,
    pub models: Vec<String>,
    pub default_model: String,
    pub rate_limits: RateLimits,
}

impl ProviderDescriptor {
    /// Whether the provider's credential requirement is satisfied.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.credential_present
    }

    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable set of configured providers plus their credentials.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderDescriptor>,
    credentials: HashMap<String, Secret>,
    default_provider: String,
    fallback_providers: Vec<String>,
}

impl ProviderRegistry {
    /// Build the registry from config, resolving credentials through `lookup`.
    ///
    /// A missing or empty credential variable makes that provider unavailable;
    /// it is not an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProvider` if the default or a fallback provider is not
    /// configured.
    pub fn load<F>(config: &Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut providers = BTreeMap::new();
        let mut credentials = HashMap::new();

        for (name, settings) in &config.providers {
            let kind = settings.kind.unwrap_or_else(|| ProviderKind::infer(name));

            let secret = settings
                .credential_env_var
                .as_deref()
                .and_then(&lookup)
                .filter(|v| !v.trim().is_empty())
                .map(Secret::new);
            let credential_present = settings.credential_env_var.is_none() || secret.is_some();
            if let Some(secret) = secret {
                credentials.insert(name.clone(), secret);
            }

            let default_model = settings
                .default_model
                .clone()
                .or_else(|| settings.models.first().cloned())
                .unwrap_or_else(|| kind.default_model().to_string());
            let mut models = settings.models.clone();
            if models.is_empty() {
                models.push(default_model.clone());
            }

            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string());

            tracing::debug!(
                provider = %name,
                kind = %kind,
                available = credential_present,
                "Registered provider"
            );

            providers.insert(
                name.clone(),
                ProviderDescriptor {
                    name: name.clone(),
                    kind,
                    credential_env_var: settings.credential_env_var.clone(),
                    credential_present,
                    base_url: base_url.trim_end_matches('/').to_string(),
                    models,
                    default_model,
                    rate_limits: settings.rate_limits,
                },
            );
        }

        for name in std::iter::once(&config.default_provider).chain(&config.fallback_providers) {
            if !providers.contains_key(name) {
                return Err(PersonaError::InvalidProvider(name.clone()));
            }
        }

        Ok(Self {
            providers,
            credentials,
            default_provider: config.default_provider.clone(),
            fallback_providers: config.fallback_providers.clone(),
        })
    }

    /// Build the registry using the process environment.
    ///
    /// # Errors
    ///
    /// See [`ProviderRegistry::load`].
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::load(config, |var| std::env::var(var).ok())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(name)
    }

    /// Look up a provider or fail with `InvalidProvider`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProvider` for unknown names.
    pub fn require(&self, name: &str) -> Result<&ProviderDescriptor> {
        self.get(name)
            .ok_or_else(|| PersonaError::InvalidProvider(name.to_string()))
    }

    #[must_use]
    pub fn credential(&self, name: &str) -> Option<&Secret> {
        self.credentials.get(name)
    }

    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.get(name).is_some_and(ProviderDescriptor::is_available)
    }

    /// All descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.values()
    }

    #[must_use]
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    #[must_use]
    pub fn fallback_providers(&self) -> &[String] {
        &self.fallback_providers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_with(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn infer_kind_from_name() {
        assert_eq!(ProviderKind::infer("openai"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::infer("Anthropic-Work"), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::infer("google"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::infer("local-ollama"), ProviderKind::Ollama);
        assert_eq!(ProviderKind::infer("openrouter"), ProviderKind::OpenRouter);
        assert_eq!(ProviderKind::infer("together"), ProviderKind::Compatible);
    }

    #[test]
    fn secret_never_prints_value() {
        let secret = Secret::new("sk-very-secret");
        assert_eq!(format!("{secret}"), "***");
        assert!(!format!("{secret:?}").contains("sk-very"));
        assert_eq!(secret.expose(), "sk-very-secret");
    }

    #[test]
    fn default_config_has_an_always_available_provider() {
        let registry = ProviderRegistry::load(&Config::default(), |_| None).unwrap();
        assert!(registry.iter().any(ProviderDescriptor::is_available));
        assert!(registry.is_available("ollama"));
        assert!(!registry.is_available("openai"));
    }

    #[test]
    fn credential_presence_follows_environment() {
        let registry = ProviderRegistry::load(
            &Config::default(),
            lookup_with(&[("OPENAI_API_KEY", "sk-test"), ("ANTHROPIC_API_KEY", "  ")]),
        )
        .unwrap();

        assert!(registry.is_available("openai"));
        assert!(!registry.is_available("anthropic"), "blank values count as absent");
        assert_eq!(registry.credential("openai").map(Secret::expose), Some("sk-test"));
        assert!(registry.credential("anthropic").is_none());
    }

    #[test]
    fn descriptor_defaults_fill_models() {
        let registry = ProviderRegistry::load(&Config::default(), |_| None).unwrap();
        let openai = registry.require("openai").unwrap();
        assert!(openai.supports_model(&openai.default_model));
        assert!(!openai.base_url.ends_with('/'));
    }

    #[test]
    fn unknown_default_provider_is_rejected() {
        let mut config = Config::default();
        config.default_provider = "nope".to_string();
        let err = ProviderRegistry::load(&config, |_| None).unwrap_err();
        assert!(matches!(err, PersonaError::InvalidProvider(name) if name == "nope"));
    }

    #[test]
    fn require_unknown_provider_fails() {
        let registry = ProviderRegistry::load(&Config::default(), |_| None).unwrap();
        assert!(registry.require("missing").is_err());
    }
}
