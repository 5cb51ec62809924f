//! Fine-tuning job supervision: configuration snapshots, single-job
//! exclusivity, and asynchronous progress streaming from the external
//! training process.

pub mod config;
pub mod error;
pub mod progress;
pub mod supervisor;

pub use config::{FineTuneConfig, LoraParams, QuantParams, TuneMethod};
pub use error::JobError;
pub use supervisor::{CANCEL_GRACE, Supervisor, TrainingJob};
