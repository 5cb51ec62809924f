//! Corpus embedding pipeline: stamps pending chunks with vectors from the
//! active provider.

use tracing::info;

use kiln_llm::Embeddings;
use kiln_memory::SqliteStore;

use crate::error::RagError;

/// Chunks per provider call. Remote batch endpoints accept far more, but a
/// small batch keeps failure blast radius and retry cost low.
const EMBED_BATCH_SIZE: usize = 16;

/// Drives re-embedding of the corpus for one provider fingerprint.
#[derive(Debug)]
pub struct Indexer<E> {
    store: SqliteStore,
    embedder: E,
}

impl<E: Embeddings> Indexer<E> {
    pub fn new(store: SqliteStore, embedder: E) -> Self {
        Self { store, embedder }
    }

    /// Flag chunks stamped by other providers as stale, then embed every
    /// chunk still missing a vector for the active fingerprint. Chunks
    /// already stamped with it are skipped. Returns how many chunks were
    /// embedded.
    ///
    /// # Errors
    ///
    /// Provider failures abort the run; chunks embedded before the failure
    /// keep their vectors, so a retry resumes where it stopped.
    pub async fn embed_pending(&self) -> Result<usize, RagError> {
        let fingerprint = self.embedder.fingerprint();
        self.store.mark_stale_except(fingerprint).await?;

        let pending = self.store.chunks_pending_embedding(fingerprint).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut embedded = 0usize;
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            for ((chunk_id, _), vector) in batch.iter().zip(&vectors) {
                self.store
                    .store_embedding(chunk_id, vector, fingerprint)
                    .await?;
                embedded += 1;
            }
        }

        info!(fingerprint, embedded, "embedding pass complete");
        Ok(embedded)
    }
}
