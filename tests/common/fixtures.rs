//! Test fixtures and factory functions for integration tests.
#![allow(dead_code)]
//!
//! Mock provider endpoints are mounted on `wiremock` servers; orchestrators
//! are built against them with no credentials and an in-memory cache.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::fixtures::*;
//!
//! let server = MockServer::start().await;
//! mount_models(&server).await;
//! mount_chat(&server, &descriptor_json("Ada")).await;
//! let orchestrator = orchestrator(&config_with_providers(&[("alpha", &server.uri())]), None);
//! ```

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use persona_core::core::provider::{ProviderDescriptor, ProviderKind, ProviderRegistry, RateLimits};
use persona_core::core::research::{FallbackResearch, ResearchOrchestrator};
use persona_core::storage::cache::{MemoryCache, ResponseCache};
use persona_core::storage::config::Config;
pub use persona_core::test_utils::{
    TEST_MODEL, anthropic_messages_body, config_with_providers, counting_fallback,
    descriptor_json, gemini_generate_body, models_body, openai_chat_body, sample_descriptor,
};

// =============================================================================
// Mock Endpoints
// =============================================================================

/// `GET /models` answering 200, used by connection validation.
pub async fn mount_models(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_body()))
        .mount(server)
        .await;
}

/// `POST /chat/completions` answering 200 with `content`.
pub async fn mount_chat(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(content)))
        .mount(server)
        .await;
}

/// `POST /chat/completions` answering `status` with an optional `Retry-After`.
pub async fn mount_chat_status(server: &MockServer, status: u16, retry_after: Option<&str>) {
    let mut response = ResponseTemplate::new(status).set_body_string("upstream said no");
    if let Some(value) = retry_after {
        response = response.insert_header("Retry-After", value);
    }
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(response)
        .mount(server)
        .await;
}

// =============================================================================
// Builders
// =============================================================================

/// Orchestrator over `config` with an in-memory cache and no credentials.
///
/// # Panics
///
/// Panics if the registry or HTTP client cannot be built.
pub fn orchestrator(config: &Config, fallback: Option<FallbackResearch>) -> ResearchOrchestrator {
    let registry = ProviderRegistry::load(config, |_| None).expect("registry");
    let cache = ResponseCache::Memory(MemoryCache::new(config.cache.max_size));
    ResearchOrchestrator::new(config, registry, Some(cache), fallback).expect("orchestrator")
}

/// Same config with retries cut so `Retry-After` values above 50 ms are not waited on.
#[must_use]
pub fn fast_fail(mut config: Config) -> Config {
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 50;
    config
}

/// Standalone descriptor for client tests.
#[must_use]
pub fn provider_descriptor(kind: ProviderKind, base_url: &str) -> ProviderDescriptor {
    ProviderDescriptor {
        name: kind.as_str().to_string(),
        kind,
        credential_env_var: Some("TEST_KEY".to_string()),
        credential_present: true,
        base_url: base_url.to_string(),
        models: vec![TEST_MODEL.to_string()],
        default_model: TEST_MODEL.to_string(),
        rate_limits: RateLimits::default(),
    }
}

/// Short timeout for client tests.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
