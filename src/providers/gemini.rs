//! Google Gemini `generateContent` client.
//!
//! The key is sent in the `x-goog-api-key` header rather than the `key`
//! query parameter so it never appears in a URL.

use serde::Deserialize;
use serde_json::json;

use super::{ClientCore, GenerateRequest, Generation};
use crate::error::Result;

#[derive(Debug)]
pub struct GeminiClient {
    pub(crate) core: ClientCore,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiClient {
    #[must_use]
    pub const fn new(core: ClientCore) -> Self {
        Self { core }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.core.api_key {
            Some(key) => request.header("x-goog-api-key", key.expose()),
            None => request,
        }
    }

    pub(crate) async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation> {
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        let path = format!("/v1beta/models/{}:generateContent", request.model);

        let response: GenerateContentResponse = self
            .core
            .execute(self.authorized(self.core.http.post(self.core.url(&path))).json(&body))
            .await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(self.core.malformed("response contained no candidate text"));
        }

        Ok(Generation::new(
            text,
            request.prompt,
            response
                .usage_metadata
                .map(|u| (u.prompt_token_count, u.candidates_token_count)),
        ))
    }

    pub(crate) async fn probe(&self) -> Result<()> {
        self.core
            .execute_empty(self.authorized(self.core.http.get(self.core.url("/v1beta/models"))))
            .await
    }
}
