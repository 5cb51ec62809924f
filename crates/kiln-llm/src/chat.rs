//! OpenAI-compatible chat completion client used for answer generation.
//!
//! The base and fine-tuned endpoints are both driven through this client;
//! they differ only in base URL and model name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 2;

/// Token accounting reported by the generation endpoint for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Per-call generation parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// One completed generation: the answer text plus token accounting.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Capability interface for answer generation.
pub trait Generator {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        params: GenParams,
    ) -> Result<Generation, ProviderError>;
}

/// Chat client against an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    #[must_use]
    pub fn new(name: &str, base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            client: crate::http::default_client(),
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl Generator for ChatClient {
    fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// Surfaces `ProviderError` after bounded retries; an empty choice list
    /// is `EmptyResponse`, never an empty answer string.
    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        params: GenParams,
    ) -> Result<Generation, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: prompt,
        });

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = send_with_retry(&self.name, MAX_RETRIES, || {
            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            req.send()
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "{} returned {status}: {text}",
                self.name
            )));
        }

        let payload: WireResponse = response.json().await?;
        let usage = payload.usage.unwrap_or_default();
        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)?;

        tracing::debug!(
            endpoint = %self.name,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "generation complete"
        );

        Ok(Generation {
            text,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
        })
    }
}
