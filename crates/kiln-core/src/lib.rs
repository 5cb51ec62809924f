//! Shared foundation: application configuration, typed event bus, and the
//! system/resource monitor.

pub mod config;
pub mod error;
pub mod events;
pub mod monitor;

pub use config::{AppConfig, RagConfig, RagMode};
pub use error::ConfigError;
pub use events::{Event, EventBus, JobStatus, LogEntry, LogLevel, TrainingProgress};
pub use monitor::{SystemMonitor, SystemStats};
