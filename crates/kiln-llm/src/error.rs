use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("missing credential for {provider}: {field}")]
    MissingCredential {
        provider: &'static str,
        field: &'static str,
    },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider returned empty response")]
    EmptyResponse,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
