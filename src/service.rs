//! Application facade tying storage, embedding, retrieval, generation, and
//! training supervision together behind one handle.
//!
//! The CLI is a thin shell over [`KilnService`]; every operation it exposes
//! lives here so the surface stays scriptable and testable without a
//! terminal attached.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast, watch};
use tracing::{info, warn};

use kiln_core::config::{AppConfig, RagConfig, RagMode};
use kiln_core::events::{Event, EventBus, JobStatus, LogEntry, LogLevel};
use kiln_core::monitor::{self, SystemMonitor, SystemStats};
use kiln_llm::{ChatClient, Embedder, Embeddings, GenParams, Generation, Generator};
use kiln_memory::{
    ChatMessage, ChatRole, Chunker, Document, Ingestor, JobRow, RetrievalResult, SqliteStore,
};
use kiln_rag::{Indexer, RagEngine, RagResponse};
use kiln_trainer::{FineTuneConfig, Supervisor, TrainingJob};

const HISTORY_LIMIT: i64 = 50;
const LOG_LIMIT: i64 = 100;
const CHAT_HISTORY_LIMIT: i64 = 200;

/// Per-call knobs for [`KilnService::chat_hybrid_mode`], where the caller
/// picks the endpoint and retrieval combination instead of the persisted
/// mode.
#[derive(Debug, Clone, Copy)]
pub struct HybridParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub use_fine_tuned: bool,
    pub use_rag: bool,
}

impl Default for HybridParams {
    fn default() -> Self {
        let defaults = GenParams::default();
        Self {
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            use_fine_tuned: false,
            use_rag: true,
        }
    }
}

/// One running knowledge-base instance: a SQLite corpus, the active
/// embedding provider, two generation endpoints, a training supervisor, and
/// the event bus they all publish to.
///
/// The embedding provider sits behind a lock because a configuration change
/// can swap it at runtime; everything else is fixed for the process
/// lifetime.
#[derive(Debug)]
pub struct KilnService {
    store: SqliteStore,
    bus: Arc<EventBus>,
    rag: RwLock<RagConfig>,
    embedder: RwLock<Embedder>,
    base: ChatClient,
    fine_tuned: ChatClient,
    supervisor: Arc<Supervisor>,
    shutdown: watch::Sender<bool>,
}

impl KilnService {
    /// Open the store, restore any persisted retrieval configuration, and
    /// spawn the background monitor and event-archiver tasks.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the embedding provider
    /// configuration is rejected.
    pub async fn new(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let store = SqliteStore::new(&config.storage.sqlite_path).await?;

        // The persisted retrieval config wins over the file-based one; a
        // `set_rag_config` from a previous run is not forgotten on restart.
        let rag = match store.load_rag_config().await? {
            Some(saved) => saved,
            None => config.rag.clone(),
        };
        rag.validate()?;

        let embedder = Embedder::new(&rag.embedding)?;
        let base = ChatClient::new(
            "base",
            &config.generation.base_url,
            config.generation.api_key.clone(),
            &config.generation.base_model,
        );
        let fine_tuned = ChatClient::new(
            "fine-tuned",
            &config.generation.fine_tuned_url,
            config.generation.api_key.clone(),
            &config.generation.fine_tuned_model,
        );

        let bus = Arc::new(EventBus::new());
        let supervisor = Arc::new(Supervisor::new(
            &config.trainer.python_bin,
            &config.trainer.script_path,
            Arc::clone(&bus),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        SystemMonitor::new(Duration::from_secs(config.monitor.interval_secs))
            .spawn(Arc::clone(&bus), shutdown_rx.clone());
        tokio::spawn(archive_events(
            store.clone(),
            Arc::clone(&supervisor),
            bus.subscribe(),
            shutdown_rx,
        ));

        info!(db = %config.storage.sqlite_path, "service started");
        Ok(Arc::new(Self {
            store,
            bus,
            rag: RwLock::new(rag),
            embedder: RwLock::new(embedder),
            base,
            fine_tuned,
            supervisor,
            shutdown,
        }))
    }

    /// Ingest a file into the corpus and chunk it under the current
    /// chunking parameters.
    ///
    /// # Errors
    ///
    /// Surfaces `IngestionError` for unsupported formats, unreadable files,
    /// and duplicate content.
    pub async fn upload_document(
        &self,
        path: &Path,
        title: Option<&str>,
    ) -> anyhow::Result<(Document, usize)> {
        let ingestor = Ingestor::new(self.store.clone(), self.chunker().await?);
        let (document, chunks) = ingestor.ingest(path, title).await?;
        self.bus.publish(Event::DocumentIngested {
            document_id: document.id.clone(),
            title: document.title.clone(),
            chunks,
        });
        self.bus.log(
            LogLevel::Info,
            "ingest",
            format!("ingested \"{}\" ({chunks} chunks)", document.title),
        );
        Ok((document, chunks))
    }

    /// All live documents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_documents(&self) -> anyhow::Result<Vec<Document>> {
        Ok(self.store.list_documents().await?)
    }

    /// Soft-delete a document. Returns `false` when no live document has
    /// this id.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn delete_document(&self, id: &str) -> anyhow::Result<bool> {
        let deleted = self.store.delete_document(id).await?;
        if deleted {
            self.bus
                .log(LogLevel::Info, "ingest", format!("deleted document {id}"));
        }
        Ok(deleted)
    }

    /// Re-split a document under the current chunking parameters. Fresh
    /// chunks start unembedded.
    ///
    /// # Errors
    ///
    /// Fails when the document does not exist.
    pub async fn rechunk_document(&self, id: &str) -> anyhow::Result<usize> {
        let ingestor = Ingestor::new(self.store.clone(), self.chunker().await?);
        let chunks = ingestor.rechunk(id).await?;
        self.bus.log(
            LogLevel::Info,
            "ingest",
            format!("rechunked document {id} into {chunks} chunks"),
        );
        Ok(chunks)
    }

    /// Embed every chunk that is missing a vector or was stamped by a
    /// different provider. Returns the number of chunks embedded.
    ///
    /// # Errors
    ///
    /// Provider and storage failures abort the run; already-stored vectors
    /// are kept.
    pub async fn embed_pending(&self) -> anyhow::Result<usize> {
        let embedder = self.embedder.read().await.clone();
        let indexer = Indexer::new(self.store.clone(), embedder);
        let embedded = indexer.embed_pending().await?;
        if embedded > 0 {
            self.bus.log(
                LogLevel::Info,
                "index",
                format!("embedded {embedded} chunks"),
            );
        }
        Ok(embedded)
    }

    /// Similarity search over the embedded corpus with the configured
    /// `top_k` and threshold.
    ///
    /// # Errors
    ///
    /// `SearchError::IndexUnavailable` when no chunk carries a current
    /// vector; provider failures propagate from query embedding.
    pub async fn search_documents(&self, query: &str) -> anyhow::Result<Vec<RetrievalResult>> {
        let rag = self.rag.read().await.clone();
        let embedder = self.embedder.read().await.clone();
        let query_vector = embedder.embed(query).await?;
        let results = self
            .store
            .search(
                &query_vector,
                rag.top_k,
                rag.similarity_threshold,
                embedder.fingerprint(),
            )
            .await?;
        Ok(results)
    }

    /// Current retrieval configuration.
    pub async fn get_rag_config(&self) -> RagConfig {
        self.rag.read().await.clone()
    }

    /// Validate, persist, and apply a new retrieval configuration.
    ///
    /// Switching the embedding provider rebuilds the embedder and marks
    /// every chunk stamped by the old provider stale; retrieval ignores
    /// stale chunks until `embed_pending` re-embeds them.
    ///
    /// # Errors
    ///
    /// `ConfigError` on invariant violations, `ProviderError` when the new
    /// provider is missing credentials. On error nothing is applied.
    pub async fn set_rag_config(&self, config: RagConfig) -> anyhow::Result<()> {
        config.validate()?;

        let mut embedder = self.embedder.write().await;
        let mut rag = self.rag.write().await;

        if config.embedding != rag.embedding {
            let next = Embedder::new(&config.embedding)?;
            let stale = self.store.mark_stale_except(next.fingerprint()).await?;
            self.bus.log(
                LogLevel::Warn,
                "config",
                format!(
                    "embedding provider changed to {}; {stale} chunks need re-embedding",
                    next.fingerprint()
                ),
            );
            *embedder = next;
        }

        self.store.save_rag_config(&config).await?;
        *rag = config;
        Ok(())
    }

    /// Answer a query under the persisted mode. The exchange is recorded in
    /// the chat history along with the ids of the documents retrieved for
    /// it.
    ///
    /// # Errors
    ///
    /// Embedding, retrieval, and generation failures propagate.
    pub async fn chat_with_documents(&self, query: &str) -> anyhow::Result<RagResponse> {
        let config = self.rag.read().await.clone();
        let response = self
            .engine()
            .await
            .answer(query, &config, GenParams::default())
            .await?;

        let mut refs: Vec<String> = Vec::new();
        for result in &response.retrieved_context {
            if !refs.contains(&result.document_id) {
                refs.push(result.document_id.clone());
            }
        }
        self.store
            .record_chat_message(&ChatMessage::new(ChatRole::User, query, Vec::new()))
            .await?;
        self.store
            .record_chat_message(&ChatMessage::new(ChatRole::Assistant, &response.answer, refs))
            .await?;

        Ok(response)
    }

    /// Recorded chat exchanges, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_chat_history(&self) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(self.store.chat_history(CHAT_HISTORY_LIMIT).await?)
    }

    /// Answer a query with retrieval against the base model regardless of
    /// the configured mode. Meant for checking retrieval quality before
    /// committing to a fine-tuned endpoint; `config` overrides the persisted
    /// retrieval parameters for this call only.
    ///
    /// # Errors
    ///
    /// Embedding, retrieval, and generation failures propagate.
    pub async fn test_rag_query(
        &self,
        query: &str,
        config: Option<RagConfig>,
    ) -> anyhow::Result<RagResponse> {
        let config = RagConfig {
            mode: RagMode::BaseWithRag,
            ..match config {
                Some(config) => config,
                None => self.rag.read().await.clone(),
            }
        };
        let response = self
            .engine()
            .await
            .answer(query, &config, GenParams::default())
            .await?;
        Ok(response)
    }

    /// Direct chat against the base endpoint, no retrieval.
    ///
    /// # Errors
    ///
    /// Generation failures propagate.
    pub async fn chat_base_model(
        &self,
        query: &str,
        params: GenParams,
    ) -> anyhow::Result<Generation> {
        self.direct_chat(&self.base, query, params).await
    }

    /// Direct chat against the fine-tuned endpoint, no retrieval.
    ///
    /// # Errors
    ///
    /// Generation failures propagate.
    pub async fn chat_fine_tuned(
        &self,
        query: &str,
        params: GenParams,
    ) -> anyhow::Result<Generation> {
        self.direct_chat(&self.fine_tuned, query, params).await
    }

    /// Answer a query with an explicit endpoint/retrieval combination,
    /// overriding the persisted mode for this call only.
    ///
    /// # Errors
    ///
    /// Embedding, retrieval, and generation failures propagate.
    pub async fn chat_hybrid_mode(
        &self,
        query: &str,
        params: HybridParams,
    ) -> anyhow::Result<RagResponse> {
        let gen_params = GenParams {
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        if params.use_rag {
            let mode = if params.use_fine_tuned {
                RagMode::FineTunedWithRag
            } else {
                RagMode::BaseWithRag
            };
            let config = RagConfig {
                mode,
                ..self.rag.read().await.clone()
            };
            let response = self.engine().await.answer(query, &config, gen_params).await?;
            return Ok(response);
        }

        // No retrieval: talk to the chosen endpoint directly and report the
        // nearest mode with an empty context list.
        let (endpoint, mode) = if params.use_fine_tuned {
            (&self.fine_tuned, RagMode::FineTunedOnly)
        } else {
            (&self.base, RagMode::BaseWithRag)
        };
        let started = std::time::Instant::now();
        let generation = self.direct_chat(endpoint, query, gen_params).await?;
        Ok(RagResponse {
            answer: generation.text,
            retrieved_context: Vec::new(),
            mode_used: mode,
            processing_time: started.elapsed(),
        })
    }

    /// Launch a fine-tuning job. Only one job runs at a time.
    ///
    /// # Errors
    ///
    /// `JobError::AlreadyRunning` while a job holds the slot; config and
    /// launch failures propagate.
    pub fn start_fine_tune(&self, config: FineTuneConfig) -> anyhow::Result<String> {
        let job_id = self.supervisor.start(config)?;
        Ok(job_id)
    }

    /// Request cancellation of the running job. Returns `false` when no job
    /// is running.
    pub fn stop_fine_tune(&self) -> bool {
        self.supervisor.cancel()
    }

    /// Snapshot of the current or most recent job in this process.
    #[must_use]
    pub fn training_status(&self) -> Option<TrainingJob> {
        self.supervisor.job_snapshot()
    }

    /// Archived jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn training_history(&self) -> anyhow::Result<Vec<JobRow>> {
        Ok(self.store.training_history(HISTORY_LIMIT).await?)
    }

    /// One-shot resource snapshot carrying the same cumulative token totals
    /// the periodic monitor reports.
    pub async fn get_system_stats(&self) -> SystemStats {
        monitor::sample_once(self.bus.token_totals()).await
    }

    /// Persisted activity log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_logs(&self) -> anyhow::Result<Vec<LogEntry>> {
        Ok(self.store.recent_logs(LOG_LIMIT).await?)
    }

    /// Attach to the live event stream: training progress and logs, job
    /// status changes, ingests, token usage, and system stats.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Stop the background monitor and archiver tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn chunker(&self) -> anyhow::Result<Chunker> {
        let rag = self.rag.read().await;
        Ok(Chunker::new(rag.chunk_size, rag.chunk_overlap)?)
    }

    async fn engine(&self) -> RagEngine<Embedder, ChatClient> {
        RagEngine::new(
            self.store.clone(),
            self.embedder.read().await.clone(),
            self.base.clone(),
            self.fine_tuned.clone(),
            Arc::clone(&self.bus),
        )
    }

    async fn direct_chat(
        &self,
        endpoint: &ChatClient,
        query: &str,
        params: GenParams,
    ) -> anyhow::Result<Generation> {
        let generation = endpoint.generate(None, query, params).await?;
        self.bus.publish(Event::TokenUsage(generation.usage));
        Ok(generation)
    }
}

/// Mirror bus events into SQLite: log entries into the bounded `logs` table
/// and job lifecycle changes into `training_jobs`. Best-effort; a failed
/// write is logged and the stream continues.
async fn archive_events(
    store: SqliteStore,
    supervisor: Arc<Supervisor>,
    mut rx: broadcast::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(Event::Log(entry)) => {
                    if let Err(error) = store.append_log(&entry).await {
                        warn!(%error, "failed to persist log entry");
                    }
                }
                Ok(Event::JobStatusChanged { job_id, status }) => {
                    archive_job_change(&store, &supervisor, &job_id, status).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event archiver lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn archive_job_change(
    store: &SqliteStore,
    supervisor: &Supervisor,
    job_id: &str,
    status: JobStatus,
) {
    // The snapshot can already belong to a newer job; archive only when the
    // ids still line up.
    let Some(job) = supervisor.job_snapshot().filter(|j| j.id == job_id) else {
        return;
    };

    let result = if status == JobStatus::Running {
        match serde_json::to_string(&job.config) {
            Ok(config_json) => {
                store
                    .record_job_started(job_id, &config_json, job.started_at)
                    .await
            }
            Err(error) => {
                warn!(%error, job_id, "failed to serialize job config");
                return;
            }
        }
    } else if status.is_terminal() {
        let progress_json = serde_json::to_string(&job.progress).ok();
        store
            .record_job_finished(
                job_id,
                status.as_str(),
                progress_json.as_deref(),
                job.error.as_deref(),
            )
            .await
    } else {
        return;
    };

    if let Err(error) = result {
        warn!(%error, job_id, "failed to archive job change");
    }
}
