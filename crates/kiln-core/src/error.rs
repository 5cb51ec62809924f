use thiserror::Error;

/// Validation failures caught before any side effect, at `set_rag_config`
/// or fine-tune `start` time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid chunking: {0}")]
    InvalidChunking(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}
