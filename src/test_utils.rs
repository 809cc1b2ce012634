//! Test utilities for persona-core.
//!
//! Provides shared helpers, test data factories, and assertion macros
//! for use across all test modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use persona_core::test_utils::*;
//!
//! let config = config_with_providers(&[("alpha", &server.uri())]);
//! let descriptor = sample_descriptor("Ada Lovelace");
//! let dir = TestDir::new();
//! dir.create_file("config.toml", "default_provider = \"alpha\"");
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use serde_json::{Value, json};

use crate::core::descriptor::{
    CommunicationStyle, Formality, PersonalityDescriptor, PersonalityTrait, PersonalityType,
    ResearchSource, TechnicalLevel, Verbosity,
};
use crate::core::provider::{ProviderKind, RateLimits};
use crate::core::research::{FallbackResearch, ResearchResult, ResearchedProfile};
use crate::storage::config::{
    CacheBackendKind, CacheSettings, Config, CostSettings, LimitSettings, ProviderSettings,
    RetrySettings,
};

/// Model name used by every provider in [`config_with_providers`].
pub const TEST_MODEL: &str = "m";

/// Confidence of profiles returned by [`counting_fallback`].
pub const FALLBACK_CONFIDENCE: f64 = 0.4;

// =============================================================================
// Test Data Factories
// =============================================================================

/// A descriptor that passes strict validation.
#[must_use]
pub fn sample_descriptor(name: &str) -> PersonalityDescriptor {
    PersonalityDescriptor {
        name: name.to_string(),
        kind: PersonalityType::RecognizablePerson,
        description: Some(format!("{name}, as remembered in tests")),
        traits: vec![
            PersonalityTrait {
                name: "curious".to_string(),
                intensity: 9,
                examples: vec!["asks why twice".to_string()],
            },
            PersonalityTrait {
                name: "precise".to_string(),
                intensity: 8,
                examples: Vec::new(),
            },
            PersonalityTrait {
                name: "warm".to_string(),
                intensity: 5,
                examples: Vec::new(),
            },
        ],
        communication_style: CommunicationStyle {
            tone: "measured".to_string(),
            formality: Formality::Formal,
            verbosity: Verbosity::Moderate,
            technical_level: TechnicalLevel::Expert,
        },
        mannerisms: vec!["annotates everything".to_string()],
        sources: vec![ResearchSource::new("ai-research", 0.85)],
    }
}

/// `sample_descriptor(name)` as the JSON text a provider would return.
#[must_use]
pub fn descriptor_json(name: &str) -> String {
    serde_json::to_string(&sample_descriptor(name)).unwrap_or_default()
}

/// Config with one OpenAI-compatible provider per `(name, base_url)` pair.
///
/// The first provider is the default, the rest are fallbacks in order. No
/// provider needs a credential. Retries and timeouts are short so failure
/// paths finish quickly.
#[must_use]
pub fn config_with_providers(providers: &[(&str, &str)]) -> Config {
    let mut map = BTreeMap::new();
    for (name, url) in providers {
        map.insert(
            (*name).to_string(),
            ProviderSettings {
                kind: Some(ProviderKind::OpenAi),
                credential_env_var: None,
                base_url: Some((*url).to_string()),
                models: vec![TEST_MODEL.to_string()],
                default_model: Some(TEST_MODEL.to_string()),
                rate_limits: RateLimits::default(),
            },
        );
    }

    Config {
        default_provider: providers
            .first()
            .map(|(name, _)| (*name).to_string())
            .unwrap_or_default(),
        fallback_providers: providers
            .iter()
            .skip(1)
            .map(|(name, _)| (*name).to_string())
            .collect(),
        providers: map,
        retry: RetrySettings {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 20,
        },
        costs: CostSettings::default(),
        cache: CacheSettings {
            enabled: true,
            backend: CacheBackendKind::Memory,
            max_size: 100,
            ..CacheSettings::default()
        },
        limits: LimitSettings {
            max_concurrent_calls: 4,
            call_timeout_seconds: 5,
            unhealthy_after_failures: 3,
            health_probe_interval_seconds: 300,
            max_tokens: 500,
            temperature: 0.2,
        },
        pricing: Vec::new(),
    }
}

/// A fallback collaborator that returns one profile for `name` and counts
/// its invocations.
#[must_use]
pub fn counting_fallback(name: &str) -> (FallbackResearch, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let name = name.to_string();
    let fallback: FallbackResearch = Arc::new(move |_description: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        let profile = ResearchedProfile::from_fallback(sample_descriptor(&name), FALLBACK_CONFIDENCE);
        async move { ResearchResult::found(profile) }.boxed()
    });
    (fallback, calls)
}

// =============================================================================
// Provider Response Bodies
// =============================================================================

/// OpenAI `/chat/completions` response carrying `content`.
#[must_use]
pub fn openai_chat_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200}
    })
}

/// Anthropic `/v1/messages` response carrying `content`.
#[must_use]
pub fn anthropic_messages_body(content: &str) -> Value {
    json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": content}],
        "usage": {"input_tokens": 110, "output_tokens": 70}
    })
}

/// Gemini `generateContent` response carrying `content`.
#[must_use]
pub fn gemini_generate_body(content: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": content}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 100, "candidatesTokenCount": 60}
    })
}

/// Model-list response accepted by every client's connection check.
#[must_use]
pub fn models_body() -> Value {
    json!({"object": "list", "data": [{"id": TEST_MODEL}], "models": [{"name": TEST_MODEL}]})
}

// =============================================================================
// Temp Directory Utilities
// =============================================================================

/// A temporary directory for tests with automatic cleanup.
///
/// Creates an isolated directory that is automatically deleted when
/// the `TestDir` is dropped. Uses the `tempfile` crate internally.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file in the temporary directory with the given content.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// Read a file from the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    /// Check if a file exists in the temporary directory.
    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    /// Get the full path to a file in the temporary directory.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            "Expected string to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Assert that a string does NOT contain a substring.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            !haystack.contains(needle),
            "Expected string NOT to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Assert that two floats are equal within epsilon (default 1e-9).
#[macro_export]
macro_rules! assert_float_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_float_eq!($left, $right, 1e-9)
    };
    ($left:expr, $right:expr, $epsilon:expr) => {
        let left: f64 = $left;
        let right: f64 = $right;
        assert!(
            (left - right).abs() < $epsilon,
            "Expected {} to equal {} (epsilon {})",
            left,
            right,
            $epsilon
        );
    };
}

// =============================================================================
// Tests for Test Utilities
// =============================================================================
