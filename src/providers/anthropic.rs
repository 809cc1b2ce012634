//! Anthropic messages API client.

use serde::Deserialize;
use serde_json::json;

use super::{ClientCore, GenerateRequest, Generation};
use crate::error::Result;

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicClient {
    pub(crate) core: ClientCore,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicClient {
    #[must_use]
    pub const fn new(core: ClientCore) -> Self {
        Self { core }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("anthropic-version", ANTHROPIC_VERSION);
        match &self.core.api_key {
            Some(key) => request.header("x-api-key", key.expose()),
            None => request,
        }
    }

    pub(crate) async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        let response: MessagesResponse = self
            .core
            .execute(
                self.authorized(self.core.http.post(self.core.url("/v1/messages")))
                    .json(&body),
            )
            .await?;

        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(self.core.malformed("response contained no text blocks"));
        }

        Ok(Generation::new(
            text,
            request.prompt,
            response.usage.map(|u| (u.input_tokens, u.output_tokens)),
        ))
    }

    pub(crate) async fn probe(&self) -> Result<()> {
        self.core
            .execute_empty(self.authorized(self.core.http.get(self.core.url("/v1/models"))))
            .await
    }
}
