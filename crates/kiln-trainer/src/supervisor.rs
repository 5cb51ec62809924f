//! Single-job training process supervisor.
//!
//! Launches the external training script, streams its output as events, and
//! enforces that at most one job runs at a time via a guarded state
//! transition: the `Running` claim happens under a lock, before the process
//! spawns, so two concurrent `start` calls resolve to exactly one success.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

use kiln_core::events::{Event, EventBus, JobStatus, TrainingProgress};

use crate::config::FineTuneConfig;
use crate::error::JobError;
use crate::progress;

/// How long a cancelled process gets to exit before a forced kill.
pub const CANCEL_GRACE: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 20;

/// Snapshot of the current or most recent job.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub id: String,
    pub config: FineTuneConfig,
    pub status: JobStatus,
    pub progress: TrainingProgress,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Supervisor {
    python_bin: String,
    script_path: String,
    bus: Arc<EventBus>,
    job: Arc<Mutex<Option<TrainingJob>>>,
    cancel: Arc<Mutex<Option<watch::Sender<bool>>>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(python_bin: &str, script_path: &str, bus: Arc<EventBus>) -> Self {
        Self {
            python_bin: python_bin.to_string(),
            script_path: script_path.to_string(),
            bus,
            job: Arc::new(Mutex::new(None)),
            cancel: Arc::new(Mutex::new(None)),
        }
    }

    /// Launch a training job. Returns the job id as soon as the process has
    /// spawned; progress and completion arrive asynchronously on the bus.
    ///
    /// # Errors
    ///
    /// `Config` when the snapshot fails validation, `AlreadyRunning` when a
    /// job holds the running slot, `LaunchFailure` when the process cannot
    /// spawn (the slot is released again).
    pub fn start(&self, config: FineTuneConfig) -> Result<String, JobError> {
        config.validate()?;
        let config_json =
            serde_json::to_string(&config).map_err(|e| JobError::LaunchFailure(e.into()))?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // Claim the running slot and spawn while still holding the lock, so
        // a concurrent start cannot slip in between claim and launch.
        let mut slot = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|j| !j.status.is_terminal()) {
            return Err(JobError::AlreadyRunning);
        }

        let mut command = tokio::process::Command::new(&self.python_bin);
        command
            .arg(&self.script_path)
            .arg(&config_json)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(JobError::LaunchFailure)?;

        *slot = Some(TrainingJob {
            id: job_id.clone(),
            config,
            status: JobStatus::Running,
            progress: TrainingProgress::default(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        });
        drop(slot);

        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel_tx);

        self.bus.publish(Event::JobStatusChanged {
            job_id: job_id.clone(),
            status: JobStatus::Running,
        });
        info!(job_id = %job_id, "training process launched");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let bus = Arc::clone(&self.bus);
        let job_slot = Arc::clone(&self.job);
        let id = job_id.clone();
        tokio::spawn(async move {
            let outcome =
                supervise(&mut child, stdout, stderr, cancel_rx, &bus, &id, &job_slot).await;
            finish(&bus, &job_slot, &id, outcome);
        });

        Ok(job_id)
    }

    /// Request cancellation of the running job. Returns `false` when no job
    /// is running. The transition to `Cancelled` is published once the
    /// process has exited, at most [`CANCEL_GRACE`] later.
    pub fn cancel(&self) -> bool {
        let running = self
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|j| j.status == JobStatus::Running);
        if !running {
            return false;
        }
        let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        match cancel.as_ref() {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Current or most recent job, if any ran this process lifetime.
    #[must_use]
    pub fn job_snapshot(&self) -> Option<TrainingJob> {
        self.job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.job_snapshot()
            .map_or(JobStatus::Idle, |j| j.status)
    }
}

enum Outcome {
    Completed,
    Failed { code: Option<i32>, tail: String },
    Cancelled,
}

async fn supervise(
    child: &mut tokio::process::Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    mut cancel_rx: watch::Receiver<bool>,
    bus: &EventBus,
    job_id: &str,
    job_slot: &Mutex<Option<TrainingJob>>,
) -> Outcome {
    let mut lines = stdout.map(|out| BufReader::new(out).lines());

    // Bounded stderr tail, retained for the crash report.
    let drain = tokio::spawn(async move {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
        tail
    });

    loop {
        let next_line = async {
            match lines.as_mut() {
                Some(lines) => lines.next_line().await,
                None => Ok(None),
            }
        };
        tokio::select! {
            line = next_line => match line {
                Ok(Some(line)) => {
                    if let Some(progress) = progress::parse_line(&line) {
                        if let Some(job) = job_slot
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .as_mut()
                        {
                            job.progress = progress.clone();
                        }
                        bus.publish(Event::TrainingProgress {
                            job_id: job_id.to_string(),
                            progress,
                        });
                    } else {
                        bus.publish(Event::TrainingLog {
                            job_id: job_id.to_string(),
                            line,
                        });
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(job_id, error = %e, "training stdout read failed");
                    break;
                }
            },
            _ = cancel_rx.changed() => {
                info!(job_id, "cancellation requested");
                kill_with_grace(child, job_id).await;
                return Outcome::Cancelled;
            }
        }
    }

    // stdout closed; collect the exit status. The process can outlive its
    // stdout, so cancellation must stay observable here too.
    let exit = tokio::select! {
        exit = child.wait() => exit,
        _ = cancel_rx.changed() => {
            info!(job_id, "cancellation requested");
            kill_with_grace(child, job_id).await;
            return Outcome::Cancelled;
        }
    };
    match exit {
        Ok(status) if status.success() => Outcome::Completed,
        Ok(status) => {
            let tail = drain.await.unwrap_or_default();
            Outcome::Failed {
                code: status.code(),
                tail: tail.into_iter().collect::<Vec<_>>().join("\n"),
            }
        }
        Err(e) => Outcome::Failed {
            code: None,
            tail: e.to_string(),
        },
    }
}

async fn kill_with_grace(child: &mut tokio::process::Child, job_id: &str) {
    if let Err(e) = child.start_kill() {
        warn!(job_id, error = %e, "failed to signal training process");
    }
    if timeout(CANCEL_GRACE, child.wait()).await.is_err() {
        warn!(job_id, "grace period expired, force-killing");
        let _ = child.kill().await;
    }
}

fn finish(bus: &EventBus, job_slot: &Mutex<Option<TrainingJob>>, job_id: &str, outcome: Outcome) {
    let (status, err) = match outcome {
        Outcome::Completed => {
            info!(job_id, "training completed");
            (JobStatus::Completed, None)
        }
        Outcome::Failed { code, tail } => {
            error!(job_id, code = ?code, "training failed");
            let message = JobError::ProcessCrashed {
                code,
                stderr_tail: tail,
            }
            .to_string();
            (JobStatus::Failed, Some(message))
        }
        Outcome::Cancelled => {
            info!(job_id, "training cancelled");
            (JobStatus::Cancelled, None)
        }
    };

    if let Some(job) = job_slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_mut()
    {
        job.status = status;
        job.error = err;
        job.finished_at = Some(Utc::now());
    }
    bus.publish(Event::JobStatusChanged {
        job_id: job_id.to_string(),
        status,
    });
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::TuneMethod;

    fn sample_config() -> FineTuneConfig {
        FineTuneConfig::new("llama3:8b", "./data/train.jsonl", "./out", TuneMethod::Lora)
    }

    fn script(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("train.sh");
        std::fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    async fn wait_for_terminal(
        rx: &mut tokio::sync::broadcast::Receiver<Event>,
    ) -> (JobStatus, Vec<Event>) {
        let mut seen = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for terminal status")
                .unwrap();
            if let Event::JobStatusChanged { status, .. } = &event {
                if status.is_terminal() {
                    return (*status, seen);
                }
            }
            seen.push(event);
        }
    }

    #[tokio::test]
    async fn successful_run_completes_with_progress_events() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(
            &dir,
            "echo 'loading model'\n\
             echo '{\"progress\": 0.5, \"message\": \"halfway\"}'\n\
             exit 0\n",
        );
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let supervisor = Supervisor::new("/bin/sh", &script, Arc::clone(&bus));

        let job_id = supervisor.start(sample_config()).unwrap();
        let (status, seen) = wait_for_terminal(&mut rx).await;

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(supervisor.status(), JobStatus::Completed);
        assert!(seen.iter().any(|e| matches!(
            e,
            Event::TrainingLog { line, .. } if line == "loading model"
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            Event::TrainingProgress { progress, .. } if progress.progress == Some(0.5)
        )));

        let job = supervisor.job_snapshot().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.progress.progress, Some(0.5));
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(&dir, "echo 'CUDA out of memory' >&2\nexit 3\n");
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let supervisor = Supervisor::new("/bin/sh", &script, Arc::clone(&bus));

        supervisor.start(sample_config()).unwrap();
        let (status, _) = wait_for_terminal(&mut rx).await;

        assert_eq!(status, JobStatus::Failed);
        let job = supervisor.job_snapshot().unwrap();
        assert!(job.error.as_deref().unwrap().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(&dir, "sleep 30\n");
        let bus = Arc::new(EventBus::new());
        let supervisor = Supervisor::new("/bin/sh", &script, Arc::clone(&bus));

        let first = supervisor.start(sample_config());
        let second = supervisor.start(sample_config());

        assert!(first.is_ok());
        assert!(matches!(second, Err(JobError::AlreadyRunning)));
        supervisor.cancel();
    }

    #[tokio::test]
    async fn cancellation_lands_within_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(&dir, "sleep 30\n");
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let supervisor = Supervisor::new("/bin/sh", &script, Arc::clone(&bus));

        supervisor.start(sample_config()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let begun = Instant::now();
        assert!(supervisor.cancel());
        let (status, _) = wait_for_terminal(&mut rx).await;

        assert_eq!(status, JobStatus::Cancelled);
        assert!(begun.elapsed() <= CANCEL_GRACE + Duration::from_secs(1));
        assert_eq!(supervisor.status(), JobStatus::Cancelled);

        // no Running progress after cancellation
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, Event::TrainingProgress { .. }));
        }
    }

    #[tokio::test]
    async fn cancellation_lands_after_stdout_closes() {
        // The process keeps running after closing its pipes; cancellation
        // must still be observed within the grace window.
        let dir = tempfile::tempdir().unwrap();
        let script = script(&dir, "exec 1>&- 2>&-\nsleep 30\n");
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let supervisor = Supervisor::new("/bin/sh", &script, Arc::clone(&bus));

        supervisor.start(sample_config()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let begun = Instant::now();
        assert!(supervisor.cancel());
        let (status, _) = wait_for_terminal(&mut rx).await;

        assert_eq!(status, JobStatus::Cancelled);
        assert!(begun.elapsed() <= CANCEL_GRACE + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn terminal_job_frees_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(&dir, "exit 0\n");
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let supervisor = Supervisor::new("/bin/sh", &script, Arc::clone(&bus));

        supervisor.start(sample_config()).unwrap();
        wait_for_terminal(&mut rx).await;

        // a fresh start succeeds after the previous job finished
        assert!(supervisor.start(sample_config()).is_ok());
        wait_for_terminal(&mut rx).await;
    }

    #[tokio::test]
    async fn invalid_config_never_launches() {
        let bus = Arc::new(EventBus::new());
        let supervisor = Supervisor::new("/bin/sh", "/nonexistent.sh", Arc::clone(&bus));
        let config = FineTuneConfig {
            dataset_path: String::new(),
            ..sample_config()
        };
        assert!(matches!(
            supervisor.start(config),
            Err(JobError::Config(_))
        ));
        assert_eq!(supervisor.status(), JobStatus::Idle);
    }

    #[tokio::test]
    async fn missing_interpreter_is_launch_failure() {
        let bus = Arc::new(EventBus::new());
        let supervisor =
            Supervisor::new("/nonexistent/python", "/tmp/train.py", Arc::clone(&bus));
        assert!(matches!(
            supervisor.start(sample_config()),
            Err(JobError::LaunchFailure(_))
        ));
        // slot rolled back
        assert_eq!(supervisor.status(), JobStatus::Idle);
    }

    #[tokio::test]
    async fn cancel_without_job_is_a_no_op() {
        let bus = Arc::new(EventBus::new());
        let supervisor = Supervisor::new("/bin/sh", "/tmp/train.sh", Arc::clone(&bus));
        assert!(!supervisor.cancel());
    }
}
