use serde::{Deserialize, Serialize};

/// Embedding backend selection. Exactly one variant is active at a time.
///
/// The serialized form is tagged by `provider`, matching the persisted
/// configuration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum EmbeddingConfig {
    /// Hosted inference API with public models; the key is optional.
    #[serde(rename = "huggingface")]
    HuggingFace {
        model_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    #[serde(rename = "openai")]
    OpenAi { api_key: String, model: String },
    #[serde(rename = "cohere")]
    Cohere { api_key: String, model: String },
    /// Local deterministic embedder; no network.
    #[serde(rename = "local")]
    Local { model_path: String },
    /// Any OpenAI-compatible embeddings endpoint.
    #[serde(rename = "custom")]
    Custom {
        name: String,
        base_url: String,
        api_key: String,
        model: String,
    },
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::HuggingFace {
            model_name: "sentence-transformers/all-MiniLM-L6-v2".into(),
            api_key: None,
        }
    }
}

impl EmbeddingConfig {
    /// Short provider kind name, stable across config edits.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HuggingFace { .. } => "huggingface",
            Self::OpenAi { .. } => "openai",
            Self::Cohere { .. } => "cohere",
            Self::Local { .. } => "local",
            Self::Custom { .. } => "custom",
        }
    }

    /// Model identifier for the active variant.
    #[must_use]
    pub fn model_id(&self) -> &str {
        match self {
            Self::HuggingFace { model_name, .. } => model_name,
            Self::OpenAi { model, .. } | Self::Cohere { model, .. } | Self::Custom { model, .. } => {
                model
            }
            Self::Local { model_path } => model_path,
        }
    }

    /// Provider fingerprint stamped onto every vector this configuration
    /// produces. A fingerprint change marks previously embedded chunks stale.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.kind(), self.model_id())
    }
}
