//! Provider capability clients.
//!
//! Every client offers the same two operations, `generate` and
//! `validate_connection`, and translates provider-specific failures into
//! [`PersonaError`]. The concrete client is picked from the descriptor's
//! [`ProviderKind`] by [`create_client`]; there is no runtime type probing.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::core::cost::estimate_tokens;
use crate::core::http::{check_status, map_transport_error};
use crate::core::provider::{ProviderDescriptor, ProviderKind, Secret};
use crate::error::{PersonaError, Result};

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Parameters for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text returned by a provider plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// False when the provider did not report usage and counts are estimated.
    pub metered: bool,
}

impl Generation {
    /// Build from provider-reported counts, estimating whatever is missing.
    #[must_use]
    pub fn new(text: String, prompt: &str, usage: Option<(u64, u64)>) -> Self {
        match usage {
            Some((prompt_tokens, completion_tokens)) => Self {
                text,
                prompt_tokens,
                completion_tokens,
                metered: true,
            },
            None => {
                let completion_tokens = estimate_tokens(&text);
                Self {
                    prompt_tokens: estimate_tokens(prompt),
                    completion_tokens,
                    text,
                    metered: false,
                }
            }
        }
    }
}

// =============================================================================
// Shared plumbing
// =============================================================================

/// State every client variant carries.
#[derive(Debug)]
pub struct ClientCore {
    pub(crate) name: String,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<Secret>,
    pub(crate) http: Client,
    pub(crate) timeout: Duration,
    validated: AtomicBool,
}

impl ClientCore {
    #[must_use]
    pub fn new(
        descriptor: &ProviderDescriptor,
        api_key: Option<Secret>,
        http: Client,
        timeout: Duration,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            base_url: descriptor.base_url.clone(),
            api_key,
            http,
            timeout,
            validated: AtomicBool::new(false),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request and decode a JSON body.
    pub(crate) async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(&self.name, e, self.timeout))?;
        let response = check_status(&self.name, response).await?;
        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                map_transport_error(&self.name, e, self.timeout)
            } else {
                self.malformed(e.without_url().to_string())
            }
        })
    }

    /// Send a request and only check the status.
    pub(crate) async fn execute_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(&self.name, e, self.timeout))?;
        check_status(&self.name, response).await.map(|_| ())
    }

    pub(crate) fn malformed(&self, message: impl Into<String>) -> PersonaError {
        PersonaError::MalformedResponse {
            provider: self.name.clone(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Client enum
// =============================================================================

/// One capability client per provider family.
#[derive(Debug)]
pub enum ProviderClient {
    OpenAi(OpenAiClient),
    Anthropic(AnthropicClient),
    Gemini(GeminiClient),
}

/// Pick the client variant for `descriptor`.
#[must_use]
pub fn create_client(
    descriptor: &ProviderDescriptor,
    api_key: Option<Secret>,
    http: Client,
    timeout: Duration,
) -> ProviderClient {
    let core = ClientCore::new(descriptor, api_key, http, timeout);
    match descriptor.kind {
        ProviderKind::Anthropic => ProviderClient::Anthropic(AnthropicClient::new(core)),
        ProviderKind::Gemini => ProviderClient::Gemini(GeminiClient::new(core)),
        ProviderKind::OpenAi
        | ProviderKind::Ollama
        | ProviderKind::OpenRouter
        | ProviderKind::Compatible => ProviderClient::OpenAi(OpenAiClient::new(core)),
    }
}

impl ProviderClient {
    const fn core(&self) -> &ClientCore {
        match self {
            Self::OpenAi(c) => &c.core,
            Self::Anthropic(c) => &c.core,
            Self::Gemini(c) => &c.core,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.core().name
    }

    /// Generate text. Any failure clears the cached connection validation.
    ///
    /// # Errors
    ///
    /// Transport, status, and envelope failures mapped into the taxonomy.
    pub async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation> {
        let result = match self {
            Self::OpenAi(c) => c.generate(request).await,
            Self::Anthropic(c) => c.generate(request).await,
            Self::Gemini(c) => c.generate(request).await,
        };
        if result.is_err() {
            self.core().validated.store(false, Ordering::Release);
        }
        result
    }

    /// Lightweight authenticated request (model listing).
    ///
    /// # Errors
    ///
    /// The classified failure of the probe request.
    pub async fn probe(&self) -> Result<()> {
        match self {
            Self::OpenAi(c) => c.probe().await,
            Self::Anthropic(c) => c.probe().await,
            Self::Gemini(c) => c.probe().await,
        }
    }

    /// Probe once per client until a generate call fails.
    ///
    /// # Errors
    ///
    /// The classified failure of the probe request.
    pub async fn ensure_validated(&self) -> Result<()> {
        if self.core().validated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.probe().await?;
        self.core().validated.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the provider is reachable with the configured credential.
    pub async fn validate_connection(&self) -> bool {
        match self.ensure_validated().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(provider = %self.name(), error = %err, "Connection validation failed");
                false
            }
        }
    }

    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.core().validated.load(Ordering::Acquire)
    }
}
