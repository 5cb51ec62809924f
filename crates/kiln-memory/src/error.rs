use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("unsupported format: .{extension}")]
    UnsupportedFormat { extension: String },

    #[error("failed to parse file: {0}")]
    ParseFailure(String),

    #[error("byte-identical content already ingested as document {existing_id}")]
    DuplicateContent { existing_id: String },

    #[error("file too large: {size} bytes (limit {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum SearchError {
    /// No embedded chunks exist for the active provider fingerprint.
    #[error("vector index unavailable for the active embedding provider")]
    IndexUnavailable,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Failures in the ancillary persisted tables (config, jobs, logs).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
