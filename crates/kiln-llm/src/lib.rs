//! Embedding providers and generation clients.
//!
//! One embedding backend is active at a time, selected by [`EmbeddingConfig`].
//! Credentials are validated when the [`Embedder`] is constructed, not on
//! first use. Generation goes through an OpenAI-compatible chat endpoint.

pub mod chat;
pub mod config;
pub mod embedder;
pub mod error;
pub mod http;
mod local;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod retry;

pub use chat::{ChatClient, GenParams, Generation, Generator, TokenUsage};
pub use config::EmbeddingConfig;
pub use embedder::{Embedder, Embeddings};
pub use error::ProviderError;
