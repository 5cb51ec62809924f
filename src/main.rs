use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kiln::{HybridParams, KilnService};
use kiln_core::config::{AppConfig, RagMode};
use kiln_core::events::{Event, JobStatus};
use kiln_llm::GenParams;
use kiln_trainer::{FineTuneConfig, TuneMethod};

#[derive(Parser)]
#[command(name = "kiln", version, about = "Local knowledge base with RAG and fine-tune supervision")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "kiln.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a document into the corpus.
    Ingest {
        path: PathBuf,
        /// Display title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
    /// Manage stored documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },
    /// Embed chunks that are missing a vector or stamped by an old provider.
    Embed,
    /// Similarity search over the embedded corpus.
    Search { query: String },
    /// Ask a question.
    Chat {
        query: String,
        /// Override the persisted mode for this call.
        #[arg(long)]
        mode: Option<RagMode>,
    },
    /// Show or change the retrieval configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage fine-tuning jobs.
    Tune {
        #[command(subcommand)]
        action: TuneAction,
    },
    /// Recorded chat exchanges, oldest first.
    History,
    /// One-shot resource snapshot.
    Stats,
    /// Recent activity log.
    Logs,
}

#[derive(Subcommand)]
enum DocsAction {
    /// List live documents.
    List,
    /// Soft-delete a document.
    Delete { id: String },
    /// Re-split a document under the current chunking parameters.
    Rechunk { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active retrieval configuration.
    Show,
    /// Switch the query dispatch mode.
    SetMode { mode: RagMode },
    /// Change chunking parameters. Existing chunks keep their old split
    /// until rechunked.
    SetChunking { size: usize, overlap: usize },
}

#[derive(Subcommand)]
enum TuneAction {
    /// Launch a fine-tuning job and follow its progress.
    Start {
        #[arg(long)]
        base_model: String,
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long, default_value = "./output")]
        output: PathBuf,
        #[arg(long, default_value = "lora")]
        method: String,
        #[arg(long)]
        epochs: Option<u32>,
    },
    /// Cancel the running job.
    Stop,
    /// Show the current job, if any, and recent history.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let service = KilnService::new(config).await?;

    run(&service, cli.command).await?;
    service.shutdown();
    Ok(())
}

async fn run(service: &KilnService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest { path, title } => {
            let (document, chunks) = service.upload_document(&path, title.as_deref()).await?;
            println!("{} \"{}\" ({chunks} chunks)", document.id, document.title);
        }
        Command::Docs { action } => run_docs(service, action).await?,
        Command::Embed => {
            let embedded = service.embed_pending().await?;
            println!("embedded {embedded} chunks");
        }
        Command::Search { query } => {
            for result in service.search_documents(&query).await? {
                println!(
                    "{:.3}  [{} #{}] {}",
                    result.score,
                    result.document_title,
                    result.chunk_index,
                    preview(&result.content)
                );
            }
        }
        Command::Chat { query, mode } => {
            let response = match mode {
                None => service.chat_with_documents(&query).await?,
                Some(mode) => {
                    let defaults = GenParams::default();
                    service
                        .chat_hybrid_mode(
                            &query,
                            HybridParams {
                                temperature: defaults.temperature,
                                max_tokens: defaults.max_tokens,
                                use_fine_tuned: mode.uses_fine_tuned(),
                                use_rag: mode.uses_retrieval(),
                            },
                        )
                        .await?
                }
            };
            println!("{}", response.answer);
            if !response.retrieved_context.is_empty() {
                println!();
                println!("sources:");
                for result in &response.retrieved_context {
                    println!(
                        "  {:.3}  {} #{}",
                        result.score, result.document_title, result.chunk_index
                    );
                }
            }
        }
        Command::Config { action } => run_config(service, action).await?,
        Command::History => {
            for message in service.get_chat_history().await? {
                println!(
                    "{} {:9} {}",
                    message.created_at.format("%Y-%m-%d %H:%M:%S"),
                    message.role.as_str(),
                    message.content
                );
                if !message.document_refs.is_empty() {
                    println!("          refs: {}", message.document_refs.join(", "));
                }
            }
        }
        Command::Tune { action } => run_tune(service, action).await?,
        Command::Stats => {
            let stats = service.get_system_stats().await;
            println!("cpu:    {:.1}%", stats.cpu_usage);
            println!(
                "memory: {} / {} MiB",
                stats.memory_used / (1024 * 1024),
                stats.memory_total / (1024 * 1024)
            );
            println!(
                "disk:   {} / {} GiB",
                stats.disk_used / (1024 * 1024 * 1024),
                stats.disk_total / (1024 * 1024 * 1024)
            );
        }
        Command::Logs => {
            for entry in service.recent_logs().await? {
                println!(
                    "{} {:5} [{}] {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.level.as_str(),
                    entry.component,
                    entry.message
                );
            }
        }
    }
    Ok(())
}

async fn run_docs(service: &KilnService, action: DocsAction) -> anyhow::Result<()> {
    match action {
        DocsAction::List => {
            for document in service.get_documents().await? {
                println!(
                    "{}  {}  ({}, {})",
                    document.id,
                    document.title,
                    document.file_type.as_str(),
                    document.created_at.format("%Y-%m-%d")
                );
            }
        }
        DocsAction::Delete { id } => {
            if service.delete_document(&id).await? {
                println!("deleted {id}");
            } else {
                println!("no document with id {id}");
            }
        }
        DocsAction::Rechunk { id } => {
            let chunks = service.rechunk_document(&id).await?;
            println!("rechunked into {chunks} chunks; run `kiln embed` to re-embed");
        }
    }
    Ok(())
}

async fn run_config(service: &KilnService, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = service.get_rag_config().await;
            println!("mode:       {}", config.mode.as_str());
            println!("embedding:  {}", config.embedding.fingerprint());
            println!(
                "chunking:   {} words, {} overlap",
                config.chunk_size, config.chunk_overlap
            );
            println!(
                "retrieval:  top {} above {:.2}",
                config.top_k, config.similarity_threshold
            );
        }
        ConfigAction::SetMode { mode } => {
            let mut config = service.get_rag_config().await;
            config.mode = mode;
            service.set_rag_config(config).await?;
            println!("mode set to {}", mode.as_str());
        }
        ConfigAction::SetChunking { size, overlap } => {
            let mut config = service.get_rag_config().await;
            config.chunk_size = size;
            config.chunk_overlap = overlap;
            service.set_rag_config(config).await?;
            println!("chunking set to {size}/{overlap}; rechunk documents to apply");
        }
    }
    Ok(())
}

async fn run_tune(service: &KilnService, action: TuneAction) -> anyhow::Result<()> {
    match action {
        TuneAction::Start {
            base_model,
            dataset,
            output,
            method,
            epochs,
        } => {
            let method = parse_method(&method)?;
            let mut config = FineTuneConfig::new(
                &base_model,
                &dataset.to_string_lossy(),
                &output.to_string_lossy(),
                method,
            );
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            let job_id = service.start_fine_tune(config)?;
            println!("started job {job_id}");
            follow_job(service, &job_id).await;
        }
        TuneAction::Stop => {
            if service.stop_fine_tune() {
                println!("cancellation requested");
            } else {
                println!("no job running");
            }
        }
        TuneAction::Status => {
            match service.training_status() {
                Some(job) => {
                    println!("{}  {}  {}", job.id, job.status.as_str(), job.config.base_model);
                    if let Some(progress) = job.progress.progress {
                        println!("progress: {:.0}%", progress * 100.0);
                    }
                    if let Some(error) = &job.error {
                        println!("error: {error}");
                    }
                }
                None => println!("no job in this session"),
            }
            let history = service.training_history().await?;
            if !history.is_empty() {
                println!();
                println!("history:");
                for row in history {
                    println!(
                        "  {}  {:9}  started {}",
                        row.id,
                        row.status,
                        row.started_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }
    Ok(())
}

/// Stream progress to the terminal until the job reaches a terminal state
/// or the user interrupts; the job itself keeps running on interrupt.
async fn follow_job(service: &KilnService, job_id: &str) {
    let mut rx = service.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(Event::TrainingProgress { job_id: id, progress }) if id == job_id => {
                    if let Some(fraction) = progress.progress {
                        let message = progress.message.as_deref().unwrap_or("");
                        println!("{:.0}%  {message}", fraction * 100.0);
                    }
                }
                Ok(Event::TrainingLog { job_id: id, line }) if id == job_id => {
                    println!("| {line}");
                }
                Ok(Event::JobStatusChanged { job_id: id, status }) if id == job_id => {
                    if status.is_terminal() {
                        println!("job {}", status.as_str());
                        if status == JobStatus::Failed {
                            if let Some(job) = service.training_status() {
                                if let Some(error) = &job.error {
                                    println!("{error}");
                                }
                            }
                        }
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("detached; job keeps running (kiln tune status)");
                break;
            }
        }
    }
}

fn parse_method(s: &str) -> anyhow::Result<TuneMethod> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow::anyhow!("unknown tuning method: {s}"))
}

fn preview(content: &str) -> String {
    const MAX: usize = 120;
    if content.chars().count() <= MAX {
        return content.to_string();
    }
    let cut: String = content.chars().take(MAX).collect();
    format!("{cut}...")
}
