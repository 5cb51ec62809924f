//! Mode-dispatching query orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use kiln_core::config::{RagConfig, RagMode};
use kiln_core::events::{Event, EventBus};
use kiln_llm::{Embeddings, GenParams, Generator};
use kiln_memory::{RetrievalResult, SqliteStore};

use crate::context::{self, MAX_CONTEXT_CHARS};
use crate::error::RagError;

const RAG_SYSTEM_PROMPT: &str = "You are a knowledge-base assistant. Answer the \
question using the provided context. If the context does not contain the \
answer, say so instead of guessing.";

const DIRECT_SYSTEM_PROMPT: &str = "You are a knowledge-base assistant. Answer \
the question directly and concisely.";

/// One answered query.
#[derive(Debug, Clone)]
pub struct RagResponse {
    pub answer: String,
    pub retrieved_context: Vec<RetrievalResult>,
    pub mode_used: RagMode,
    pub processing_time: Duration,
}

/// Stateless per call; holds the store, the active embedding provider, and
/// the two generation endpoints. Which pieces run is decided by the mode in
/// the config passed to [`RagEngine::answer`].
#[derive(Debug)]
pub struct RagEngine<E, G> {
    store: SqliteStore,
    embedder: E,
    base: G,
    fine_tuned: G,
    bus: Arc<EventBus>,
}

impl<E: Embeddings, G: Generator> RagEngine<E, G> {
    pub fn new(
        store: SqliteStore,
        embedder: E,
        base: G,
        fine_tuned: G,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            embedder,
            base,
            fine_tuned,
            bus,
        }
    }

    /// Answer a query under the given configuration.
    ///
    /// # Errors
    ///
    /// Embedding, retrieval, and generation failures all propagate; no mode
    /// ever substitutes an empty answer for an error.
    pub async fn answer(
        &self,
        query: &str,
        config: &RagConfig,
        params: GenParams,
    ) -> Result<RagResponse, RagError> {
        let started = Instant::now();
        let mode = config.mode;

        let retrieved = if mode.uses_retrieval() {
            self.retrieve(query, config).await?
        } else {
            Vec::new()
        };

        let generator = if mode.uses_fine_tuned() {
            &self.fine_tuned
        } else {
            &self.base
        };

        let (system, prompt) = if mode.uses_retrieval() {
            let context = context::assemble(&retrieved, MAX_CONTEXT_CHARS);
            (
                RAG_SYSTEM_PROMPT,
                format!("Context:\n{context}\n\nQuestion: {query}"),
            )
        } else {
            (DIRECT_SYSTEM_PROMPT, query.to_string())
        };

        let generation = generator.generate(Some(system), &prompt, params).await?;
        self.bus.publish(Event::TokenUsage(generation.usage));

        info!(
            mode = mode.as_str(),
            endpoint = generator.name(),
            retrieved = retrieved.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );

        Ok(RagResponse {
            answer: generation.text,
            retrieved_context: retrieved,
            mode_used: mode,
            processing_time: started.elapsed(),
        })
    }

    async fn retrieve(
        &self,
        query: &str,
        config: &RagConfig,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        let query_vector = self.embedder.embed(query).await?;
        let results = self
            .store
            .search(
                &query_vector,
                config.top_k,
                config.similarity_threshold,
                self.embedder.fingerprint(),
            )
            .await?;
        debug!(
            candidates = results.len(),
            top_k = config.top_k,
            threshold = config.similarity_threshold,
            "retrieval complete"
        );
        Ok(results)
    }
}
