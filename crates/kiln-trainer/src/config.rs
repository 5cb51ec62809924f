//! Fine-tuning job configuration, serialized to JSON and handed to the
//! external training process as its single argument.

use serde::{Deserialize, Serialize};

use kiln_core::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuneMethod {
    Lora,
    Qlora,
    Full,
    Instruction,
    RagSpecific,
}

impl TuneMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lora => "lora",
            Self::Qlora => "qlora",
            Self::Full => "full",
            Self::Instruction => "instruction",
            Self::RagSpecific => "rag_specific",
        }
    }
}

/// Low-rank adaptation hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraParams {
    pub r: u32,
    pub alpha: u32,
    pub dropout: f64,
}

impl Default for LoraParams {
    fn default() -> Self {
        Self {
            r: 16,
            alpha: 32,
            dropout: 0.1,
        }
    }
}

/// 4-bit quantization settings, required for the qlora method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub use_4bit: bool,
    pub compute_dtype: String,
    pub use_double_quant: bool,
    pub quant_type: String,
}

impl Default for QuantParams {
    fn default() -> Self {
        Self {
            use_4bit: true,
            compute_dtype: "float16".into(),
            use_double_quant: true,
            quant_type: "nf4".into(),
        }
    }
}

/// Snapshot of everything one training run needs. Immutable once a job has
/// started; later edits only affect subsequent jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineTuneConfig {
    pub base_model: String,
    pub dataset_path: String,
    pub output_dir: String,
    pub method: TuneMethod,
    #[serde(default)]
    pub lora: LoraParams,
    #[serde(default)]
    pub quant: Option<QuantParams>,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: u32,
    #[serde(default)]
    pub use_retrieval_augmentation: bool,
    /// Corpus handed to retrieval-augmented training runs; unused otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_corpus_path: Option<String>,
}

fn default_epochs() -> u32 {
    3
}
fn default_learning_rate() -> f64 {
    2e-4
}
fn default_batch_size() -> u32 {
    4
}
fn default_max_seq_length() -> u32 {
    512
}

impl FineTuneConfig {
    #[must_use]
    pub fn new(base_model: &str, dataset_path: &str, output_dir: &str, method: TuneMethod) -> Self {
        Self {
            base_model: base_model.to_string(),
            dataset_path: dataset_path.to_string(),
            output_dir: output_dir.to_string(),
            method,
            lora: LoraParams::default(),
            quant: None,
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            max_seq_length: default_max_seq_length(),
            use_retrieval_augmentation: false,
            retrieval_corpus_path: None,
        }
    }

    /// Check the configuration before any process is launched.
    ///
    /// # Errors
    ///
    /// `MissingRequiredField` for an empty base model or dataset path, and
    /// for the qlora method without 4-bit quantization enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_model.trim().is_empty() {
            return Err(ConfigError::MissingRequiredField("base_model"));
        }
        if self.dataset_path.trim().is_empty() {
            return Err(ConfigError::MissingRequiredField("dataset_path"));
        }
        if self.epochs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "epochs",
                reason: "must be at least 1".into(),
            });
        }
        if self.method == TuneMethod::Qlora
            && !self.quant.as_ref().is_some_and(|q| q.use_4bit)
        {
            return Err(ConfigError::MissingRequiredField("quant.use_4bit"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FineTuneConfig {
        FineTuneConfig::new("llama3:8b", "./data/train.jsonl", "./out", TuneMethod::Lora)
    }

    #[test]
    fn valid_lora_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn empty_base_model_rejected() {
        let config = FineTuneConfig {
            base_model: "  ".into(),
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequiredField("base_model"))
        ));
    }

    #[test]
    fn empty_dataset_path_rejected() {
        let config = FineTuneConfig {
            dataset_path: String::new(),
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequiredField("dataset_path"))
        ));
    }

    #[test]
    fn qlora_requires_4bit_quantization() {
        let mut config = FineTuneConfig {
            method: TuneMethod::Qlora,
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequiredField("quant.use_4bit"))
        ));

        config.quant = Some(QuantParams {
            use_4bit: false,
            ..QuantParams::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequiredField("quant.use_4bit"))
        ));

        config.quant = Some(QuantParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TuneMethod::RagSpecific).unwrap(),
            "\"rag_specific\""
        );
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = base();
        let json = serde_json::to_string(&config).unwrap();
        let back: FineTuneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let config: FineTuneConfig = serde_json::from_str(
            r#"{"base_model":"m","dataset_path":"d","output_dir":"o","method":"lora"}"#,
        )
        .unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.lora.r, 16);
        assert!(config.quant.is_none());
    }
}
