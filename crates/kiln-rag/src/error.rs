use kiln_llm::ProviderError;
use kiln_memory::SearchError;

/// Failure answering a query. Retrieval-mode queries can fail at any of the
/// three stages; fine-tuned-only queries only at generation.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("embedding or generation provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
