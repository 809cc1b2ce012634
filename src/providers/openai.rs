//! OpenAI chat-completions client.
//!
//! Also serves OpenRouter, Ollama and any other endpoint that speaks the
//! `/chat/completions` dialect. The key, when present, goes in a bearer
//! header.

use serde::Deserialize;
use serde_json::json;

use super::{ClientCore, GenerateRequest, Generation};
use crate::error::Result;

#[derive(Debug)]
pub struct OpenAiClient {
    pub(crate) core: ClientCore,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiClient {
    #[must_use]
    pub const fn new(core: ClientCore) -> Self {
        Self { core }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.core.api_key {
            Some(key) => request.bearer_auth(key.expose()),
            None => request,
        }
    }

    pub(crate) async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation> {
        let body = json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response: ChatResponse = self
            .core
            .execute(
                self.authorized(self.core.http.post(self.core.url("/chat/completions")))
                    .json(&body),
            )
            .await?;

        let text = response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| self.core.malformed("response contained no message content"))?;

        Ok(Generation::new(
            text,
            request.prompt,
            response.usage.map(|u| (u.prompt_tokens, u.completion_tokens)),
        ))
    }

    pub(crate) async fn probe(&self) -> Result<()> {
        self.core
            .execute_empty(self.authorized(self.core.http.get(self.core.url("/models"))))
            .await
    }
}
