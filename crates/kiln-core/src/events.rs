//! Typed publish/subscribe event channel.
//!
//! Single writer surface, multiple subscribers, FIFO per channel, best-effort
//! delivery for the current process lifetime. A subscriber that attaches late
//! does not see events emitted before it subscribed. Log entries are
//! additionally retained in a bounded in-memory ring buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use kiln_llm::TokenUsage;

use crate::monitor::SystemStats;

const BROADCAST_CAPACITY: usize = 256;
const LOG_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
}

/// Training job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Structured progress parsed from the training process output. All fields
/// are optional; the trainer emits whatever it knows at each tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    #[serde(default)]
    pub epoch: Option<u32>,
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
    /// Overall completion fraction in `[0, 1]`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub elapsed_secs: Option<f64>,
    #[serde(default)]
    pub eta_secs: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Event {
    Log(LogEntry),
    TrainingProgress {
        job_id: String,
        progress: TrainingProgress,
    },
    TrainingLog {
        job_id: String,
        line: String,
    },
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
    },
    TokenUsage(TokenUsage),
    SystemStats(SystemStats),
    DocumentIngested {
        document_id: String,
        title: String,
        chunks: usize,
    },
}

/// Shared event bus. Cheap to clone behind an `Arc`.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    ring: Mutex<VecDeque<LogEntry>>,
    usage: Mutex<TokenUsage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            ring: Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Attach a subscriber. Only events published after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers. Log entries also land in
    /// the ring buffer, and token usage accumulates into the running totals.
    /// Delivery is best-effort; publishing with no subscribers is not an
    /// error.
    pub fn publish(&self, event: Event) {
        match &event {
            Event::Log(entry) => {
                let mut ring = self.ring.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if ring.len() == LOG_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(entry.clone());
            }
            Event::TokenUsage(usage) => {
                let mut totals = self
                    .usage
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                totals.prompt_tokens += usage.prompt_tokens;
                totals.completion_tokens += usage.completion_tokens;
                totals.total_tokens += usage.total_tokens;
            }
            _ => {}
        }
        let _ = self.tx.send(event);
    }

    /// Cumulative token usage published on this bus since process start.
    #[must_use]
    pub fn token_totals(&self) -> TokenUsage {
        *self
            .usage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Convenience for publishing a log entry.
    pub fn log(&self, level: LogLevel, component: &str, message: impl Into<String>) {
        self.publish(Event::Log(LogEntry {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
        }));
    }

    /// Snapshot of the retained log ring, oldest first.
    #[must_use]
    pub fn recent_logs(&self) -> Vec<LogEntry> {
        self.ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.log(LogLevel::Info, "test", "hello");

        let event = rx.recv().await.unwrap();
        match event {
            Event::Log(entry) => {
                assert_eq!(entry.component, "test");
                assert_eq!(entry.message, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.log(LogLevel::Info, "test", "before");

        let mut rx = bus.subscribe();
        bus.log(LogLevel::Info, "test", "after");

        let event = rx.recv().await.unwrap();
        match event {
            Event::Log(entry) => assert_eq!(entry.message, "after"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fifo_order_per_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.log(LogLevel::Info, "test", format!("msg {i}"));
        }
        for i in 0..10 {
            match rx.recv().await.unwrap() {
                Event::Log(entry) => assert_eq!(entry.message, format!("msg {i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn ring_buffer_caps_at_capacity() {
        let bus = EventBus::new();
        for i in 0..LOG_RING_CAPACITY + 20 {
            bus.log(LogLevel::Info, "test", format!("msg {i}"));
        }
        let logs = bus.recent_logs();
        assert_eq!(logs.len(), LOG_RING_CAPACITY);
        assert_eq!(logs[0].message, "msg 20");
        assert_eq!(logs.last().unwrap().message, format!("msg {}", LOG_RING_CAPACITY + 19));
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(Event::TokenUsage(TokenUsage::default()));
    }

    #[test]
    fn token_usage_accumulates_into_totals() {
        let bus = EventBus::new();
        assert_eq!(bus.token_totals().total_tokens, 0);

        for _ in 0..3 {
            bus.publish(Event::TokenUsage(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }));
        }

        let totals = bus.token_totals();
        assert_eq!(totals.prompt_tokens, 30);
        assert_eq!(totals.completion_tokens, 15);
        assert_eq!(totals.total_tokens, 45);
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Idle.is_terminal());
    }

    #[test]
    fn progress_parses_partial_payload() {
        let progress: TrainingProgress =
            serde_json::from_str(r#"{"epoch": 2, "loss": 0.41}"#).unwrap();
        assert_eq!(progress.epoch, Some(2));
        assert_eq!(progress.loss, Some(0.41));
        assert!(progress.accuracy.is_none());
    }
}
