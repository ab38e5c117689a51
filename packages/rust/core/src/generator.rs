//! Text-generation collaborator used to suggest replacement links.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use roadmend_shared::{Result, RoadmendError};

/// Boxed future returned by [`TextGenerator::generate`], keeping the trait dyn-compatible.
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Produces free text for a prompt.
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`RoadmendError::Generation`] on transport, API, or response-shape failures.
    fn generate<'a>(&'a self, prompt: &'a str) -> GenerateFuture<'a>;
}

/// OpenAI-compatible chat-completions client (OpenRouter by default).
pub struct OpenRouterGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RoadmendError::Generation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl TextGenerator for OpenRouterGenerator {
    fn generate<'a>(&'a self, prompt: &'a str) -> GenerateFuture<'a> {
        Box::pin(async move {
            let body = ChatRequest {
                model: &self.model,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
            };

            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| RoadmendError::Generation(format!("request failed: {e}")))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| RoadmendError::Generation(format!("failed to read response: {e}")))?;

            if !status.is_success() {
                let msg = serde_json::from_str::<ApiError>(&text)
                    .map(|e| e.error.message)
                    .unwrap_or(text);
                return Err(RoadmendError::Generation(format!(
                    "API error ({}): {msg}",
                    status.as_u16()
                )));
            }

            let parsed: ChatResponse = serde_json::from_str(&text)
                .map_err(|e| RoadmendError::Generation(format!("unexpected response: {e}")))?;

            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| RoadmendError::Generation("response has no choices".into()))?;

            debug!(model = %self.model, chars = content.len(), "generation complete");
            Ok(content)
        })
    }
}
