//! Embedding backend dispatch behind a single capability interface.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::ProviderError;
use crate::local;
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 2;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const HF_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/pipeline/feature-extraction";
const COHERE_EMBED_URL: &str = "https://api.cohere.com/v1/embed";

/// Capability interface for anything that can turn text into vectors.
pub trait Embeddings {
    /// Fingerprint stamped onto produced vectors, `"{kind}:{model}"`.
    fn fingerprint(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

#[derive(Clone)]
enum Backend {
    /// OpenAI itself or any OpenAI-compatible `/embeddings` endpoint.
    OpenAiCompat {
        provider: &'static str,
        base_url: String,
        api_key: String,
        model: String,
    },
    Cohere {
        api_key: String,
        model: String,
    },
    HuggingFace {
        model: String,
        api_key: Option<String>,
    },
    Local,
}

/// Active embedding provider. Credentials are validated at construction;
/// remote requests are capped by an in-flight semaphore and retried with
/// bounded exponential backoff. Clones share the HTTP client and limiter.
#[derive(Clone)]
pub struct Embedder {
    backend: Backend,
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
    fingerprint: String,
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Build the embedder for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::MissingCredential` when a required key or URL
    /// for the selected variant is empty.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let backend = match config {
            EmbeddingConfig::HuggingFace {
                model_name,
                api_key,
            } => Backend::HuggingFace {
                model: model_name.clone(),
                api_key: api_key.clone().filter(|k| !k.is_empty()),
            },
            EmbeddingConfig::OpenAi { api_key, model } => {
                if api_key.is_empty() {
                    return Err(ProviderError::MissingCredential {
                        provider: "openai",
                        field: "api_key",
                    });
                }
                Backend::OpenAiCompat {
                    provider: "openai",
                    base_url: "https://api.openai.com/v1".into(),
                    api_key: api_key.clone(),
                    model: model.clone(),
                }
            }
            EmbeddingConfig::Cohere { api_key, model } => {
                if api_key.is_empty() {
                    return Err(ProviderError::MissingCredential {
                        provider: "cohere",
                        field: "api_key",
                    });
                }
                Backend::Cohere {
                    api_key: api_key.clone(),
                    model: model.clone(),
                }
            }
            EmbeddingConfig::Local { .. } => Backend::Local,
            EmbeddingConfig::Custom {
                base_url, api_key, ..
            } => {
                if base_url.is_empty() {
                    return Err(ProviderError::MissingCredential {
                        provider: "custom",
                        field: "base_url",
                    });
                }
                if api_key.is_empty() {
                    return Err(ProviderError::MissingCredential {
                        provider: "custom",
                        field: "api_key",
                    });
                }
                Backend::OpenAiCompat {
                    provider: "custom",
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key: api_key.clone(),
                    model: config.model_id().to_string(),
                }
            }
        };

        Ok(Self {
            backend,
            client: crate::http::default_client(),
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            fingerprint: config.fingerprint(),
        })
    }

    /// Override the in-flight request cap for remote backends.
    #[must_use]
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.limiter = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    #[cfg(test)]
    fn with_base_url(mut self, url: &str) -> Self {
        if let Backend::OpenAiCompat { base_url, .. } = &mut self.backend {
            *base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ProviderError::InvalidResponse("embedding limiter closed".into()))?;

        match &self.backend {
            Backend::Local => Ok(texts.iter().map(|t| local::hash_embed(t)).collect()),
            Backend::OpenAiCompat {
                provider,
                base_url,
                api_key,
                model,
            } => {
                let url = format!("{base_url}/embeddings");
                let body = serde_json::json!({ "model": model, "input": texts });
                let response = send_with_retry(provider, MAX_RETRIES, || {
                    self.client
                        .post(&url)
                        .bearer_auth(api_key)
                        .json(&body)
                        .send()
                })
                .await?;

                #[derive(Deserialize)]
                struct Item {
                    index: usize,
                    embedding: Vec<f32>,
                }
                #[derive(Deserialize)]
                struct Payload {
                    data: Vec<Item>,
                }

                let mut payload: Payload = response.json().await?;
                payload.data.sort_by_key(|i| i.index);
                if payload.data.len() != texts.len() {
                    return Err(ProviderError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        payload.data.len()
                    )));
                }
                Ok(payload.data.into_iter().map(|i| i.embedding).collect())
            }
            Backend::Cohere { api_key, model } => {
                let body = serde_json::json!({
                    "texts": texts,
                    "model": model,
                    "input_type": "search_document",
                });
                let response = send_with_retry("cohere", MAX_RETRIES, || {
                    self.client
                        .post(COHERE_EMBED_URL)
                        .bearer_auth(api_key)
                        .json(&body)
                        .send()
                })
                .await?;

                #[derive(Deserialize)]
                struct Payload {
                    embeddings: Vec<Vec<f32>>,
                }

                let payload: Payload = response.json().await?;
                if payload.embeddings.len() != texts.len() {
                    return Err(ProviderError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        payload.embeddings.len()
                    )));
                }
                Ok(payload.embeddings)
            }
            Backend::HuggingFace { model, api_key } => {
                let url = format!("{HF_INFERENCE_BASE}/{model}");
                let body = serde_json::json!({
                    "inputs": texts,
                    "options": { "wait_for_model": true },
                });
                let response = send_with_retry("huggingface", MAX_RETRIES, || {
                    let mut req = self.client.post(&url).json(&body);
                    if let Some(key) = api_key {
                        req = req.bearer_auth(key);
                    }
                    req.send()
                })
                .await?;

                let vectors: Vec<Vec<f32>> = response.json().await?;
                if vectors.len() != texts.len() {
                    return Err(ProviderError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }
                Ok(vectors)
            }
        }
    }
}

impl Embeddings for Embedder {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// # Errors
    ///
    /// Surfaces `ProviderError` after bounded retries are exhausted.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.request_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or(ProviderError::EmptyResponse)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_batch(texts).await
    }
}
