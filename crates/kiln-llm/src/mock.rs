//! Test-only mock embedding and generation providers.

use std::sync::{Arc, Mutex};

use crate::chat::{GenParams, Generation, Generator, TokenUsage};
use crate::embedder::Embeddings;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub fingerprint: String,
    /// Fixed vector returned for every input; when empty, a deterministic
    /// per-text hash vector is produced instead.
    pub vector: Vec<f32>,
    pub fail: bool,
    pub dims: usize,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            fingerprint: "mock:test-model".into(),
            vector: Vec::new(),
            fail: false,
            dims: 8,
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self {
            vector,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if !self.vector.is_empty() {
            return self.vector.clone();
        }
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        (0..self.dims)
            .map(|i| f32::from(bytes[i % bytes.len()]) / 255.0)
            .collect()
    }
}

impl Embeddings for MockEmbedder {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if self.fail {
            return Err(ProviderError::InvalidResponse("mock embed error".into()));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.fail {
            return Err(ProviderError::InvalidResponse("mock embed error".into()));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct MockGenerator {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub fail: bool,
    pub usage: TokenUsage,
    /// Prompts received, for asserting what reached the endpoint.
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock answer".into(),
            fail: false,
            usage: TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 2,
                total_tokens: 7,
            },
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockGenerator {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

impl Generator for MockGenerator {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        _system: Option<&str>,
        prompt: &str,
        _params: GenParams,
    ) -> Result<Generation, ProviderError> {
        if self.fail {
            return Err(ProviderError::InvalidResponse("mock generation error".into()));
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        let text = if responses.is_empty() {
            self.default_response.clone()
        } else {
            responses.remove(0)
        };
        Ok(Generation {
            text,
            usage: self.usage,
        })
    }
}
