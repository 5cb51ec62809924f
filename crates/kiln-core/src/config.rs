use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use kiln_llm::EmbeddingConfig;

use crate::error::ConfigError;

/// Query dispatch mode for the RAG orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RagMode {
    #[serde(rename = "fine_tuned_only")]
    FineTunedOnly,
    #[serde(rename = "fine_tuned_rag")]
    FineTunedWithRag,
    #[serde(rename = "base_rag")]
    BaseWithRag,
}

impl RagMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FineTunedOnly => "fine_tuned_only",
            Self::FineTunedWithRag => "fine_tuned_rag",
            Self::BaseWithRag => "base_rag",
        }
    }

    /// Whether this mode performs retrieval before generation.
    #[must_use]
    pub fn uses_retrieval(self) -> bool {
        !matches!(self, Self::FineTunedOnly)
    }

    /// Whether this mode targets the fine-tuned endpoint.
    #[must_use]
    pub fn uses_fine_tuned(self) -> bool {
        !matches!(self, Self::BaseWithRag)
    }
}

impl FromStr for RagMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fine_tuned_only" => Ok(Self::FineTunedOnly),
            "fine_tuned_rag" => Ok(Self::FineTunedWithRag),
            "base_rag" => Ok(Self::BaseWithRag),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Singleton retrieval configuration, persisted and mutated only via an
/// explicit save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub embedding: EmbeddingConfig,
    pub mode: RagMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub similarity_threshold: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            mode: RagMode::BaseWithRag,
            chunk_size: 200,
            chunk_overlap: 50,
            top_k: 5,
            similarity_threshold: 0.3,
        }
    }
}

impl RagConfig {
    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `chunk_overlap >= chunk_size`,
    /// `chunk_size == 0`, `top_k == 0`, or the similarity threshold is
    /// outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunking(
                "chunk_size must be at least 1".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "top_k",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "similarity_threshold",
                reason: format!("{} is outside [0, 1]", self.similarity_threshold),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub sqlite_path: String,
}

/// Generation endpoints: the base model and the locally served fine-tuned
/// model, both OpenAI-compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub base_url: String,
    pub base_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub fine_tuned_url: String,
    pub fine_tuned_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub python_bin: String,
    pub script_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub rag: RagConfig,
    pub generation: GenerationConfig,
    pub trainer: TrainerConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting RAG section violates its invariants.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.rag.validate().context("invalid [rag] section")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KILN_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("KILN_GENERATION_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Ok(v) = std::env::var("KILN_GENERATION_MODEL") {
            self.generation.base_model = v;
        }
        if let Ok(v) = std::env::var("KILN_TRAINER_PYTHON") {
            self.trainer.python_bin = v;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                sqlite_path: "./data/kiln.db".into(),
            },
            rag: RagConfig::default(),
            generation: GenerationConfig {
                base_url: "http://localhost:11434/v1".into(),
                base_model: "llama3:8b".into(),
                api_key: None,
                fine_tuned_url: "http://localhost:11434/v1".into(),
                fine_tuned_model: "kiln-tuned".into(),
            },
            trainer: TrainerConfig {
                python_bin: "python3".into(),
                script_path: "./backend/fine_tune.py".into(),
            },
            monitor: MonitorConfig { interval_secs: 2 },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = AppConfig::default();
        assert_eq!(config.storage.sqlite_path, "./data/kiln.db");
        assert_eq!(config.rag.chunk_size, 200);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.rag.mode, RagMode::BaseWithRag);
        assert_eq!(config.monitor.interval_secs, 2);
    }

    #[test]
    fn parse_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[storage]
sqlite_path = "./test.db"

[rag]
mode = "fine_tuned_rag"
chunk_size = 120
chunk_overlap = 20
top_k = 3
similarity_threshold = 0.5

[rag.embedding]
provider = "local"
model_path = "./models/minilm"

[generation]
base_url = "http://custom:1234/v1"
base_model = "phi3:mini"
fine_tuned_url = "http://custom:1234/v1"
fine_tuned_model = "tuned"

[trainer]
python_bin = "python3"
script_path = "./train.py"

[monitor]
interval_secs = 5
"#
        )
        .unwrap();

        for key in [
            "KILN_SQLITE_PATH",
            "KILN_GENERATION_BASE_URL",
            "KILN_GENERATION_MODEL",
            "KILN_TRAINER_PYTHON",
        ] {
            unsafe { std::env::remove_var(key) };
        }

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.storage.sqlite_path, "./test.db");
        assert_eq!(config.rag.mode, RagMode::FineTunedWithRag);
        assert_eq!(config.rag.chunk_size, 120);
        assert_eq!(config.rag.embedding.kind(), "local");
        assert_eq!(config.generation.base_model, "phi3:mini");
        assert_eq!(config.monitor.interval_secs, 5);
    }

    #[test]
    fn env_overrides() {
        let mut config = AppConfig::default();
        assert_eq!(config.generation.base_model, "llama3:8b");

        unsafe { std::env::set_var("KILN_GENERATION_MODEL", "mistral:7b") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("KILN_GENERATION_MODEL") };

        assert_eq!(config.generation.base_model, "mistral:7b");
    }

    #[test]
    fn default_rag_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let config = RagConfig {
            chunk_size: 50,
            chunk_overlap: 50,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunking(_))
        ));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config = RagConfig {
            chunk_size: 0,
            chunk_overlap: 0,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunking(_))
        ));
    }

    #[test]
    fn zero_top_k_rejected() {
        let config = RagConfig {
            top_k: 0,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "top_k", .. })
        ));
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        let config = RagConfig {
            similarity_threshold: 1.2,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "similarity_threshold",
                ..
            })
        ));
    }

    #[test]
    fn mode_parses_from_str() {
        assert_eq!("base_rag".parse::<RagMode>().unwrap(), RagMode::BaseWithRag);
        assert_eq!(
            "fine_tuned_only".parse::<RagMode>().unwrap(),
            RagMode::FineTunedOnly
        );
        assert!(matches!(
            "turbo".parse::<RagMode>(),
            Err(ConfigError::InvalidMode(_))
        ));
    }

    #[test]
    fn mode_capabilities() {
        assert!(!RagMode::FineTunedOnly.uses_retrieval());
        assert!(RagMode::BaseWithRag.uses_retrieval());
        assert!(RagMode::FineTunedWithRag.uses_fine_tuned());
        assert!(!RagMode::BaseWithRag.uses_fine_tuned());
    }
}
