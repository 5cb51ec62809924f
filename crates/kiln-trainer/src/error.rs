use kiln_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("a fine-tuning job is already running")]
    AlreadyRunning,

    #[error("failed to launch training process: {0}")]
    LaunchFailure(#[source] std::io::Error),

    #[error("training process crashed (exit code {code:?}): {stderr_tail}")]
    ProcessCrashed {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
