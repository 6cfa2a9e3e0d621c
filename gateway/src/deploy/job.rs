//! Deploy job records

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::deploy::fsm::{next_state, JobEvent, JobState};
use crate::deploy::DeployError;

/// Why a job ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The script could not be started. No exit code exists.
    Spawn { message: String },
    NonZeroExit,
    /// Killed by a signal it did not send itself
    Signalled { signal: Option<i32> },
    Cancelled,
    Wait { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Spawn { message } => write!(f, "spawn failed: {}", message),
            FailureReason::NonZeroExit => write!(f, "nonzero exit"),
            FailureReason::Signalled { signal: Some(sig) } => write!(f, "killed by signal {}", sig),
            FailureReason::Signalled { signal: None } => write!(f, "killed by signal"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Wait { message } => write!(f, "wait failed: {}", message),
        }
    }
}

/// Snapshot of a deploy job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployJob {
    pub job_id: Uuid,
    pub service_id: String,
    pub service_name: String,
    /// Identity that requested the deploy
    pub requested_by: String,
    pub started_at: DateTime<Utc>,
    pub state: JobState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock limit the job ran under
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl DeployJob {
    pub fn queued(service_id: &str, service_name: &str, requested_by: &str, timeout: Duration) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            requested_by: requested_by.to_string(),
            started_at: Utc::now(),
            state: JobState::Queued,
            pid: None,
            exit_code: None,
            failure: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            finished_at: None,
            timeout,
        }
    }

    /// Apply an event, recording whatever it carries. Invalid transitions
    /// leave the job untouched.
    pub fn apply(&mut self, event: JobEvent) -> Result<(), String> {
        let next = next_state(self.state, &event)?;

        match event {
            JobEvent::Started { pid } => self.pid = pid,
            JobEvent::SpawnFailed(message) => {
                self.failure = Some(FailureReason::Spawn { message });
            }
            JobEvent::Exited { code, signal } => {
                self.exit_code = code;
                if next == JobState::Failed {
                    self.failure = Some(match code {
                        Some(_) => FailureReason::NonZeroExit,
                        None => FailureReason::Signalled { signal },
                    });
                }
            }
            JobEvent::WaitFailed(message) => {
                self.failure = Some(FailureReason::Wait { message });
            }
            JobEvent::Cancelled => self.failure = Some(FailureReason::Cancelled),
            JobEvent::TimedOut => {}
        }

        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Final judgment on a terminal job. `None` while the job is still active.
    pub fn outcome(&self) -> Option<Result<(), DeployError>> {
        match self.state {
            JobState::Queued | JobState::Running => None,
            JobState::Succeeded => Some(Ok(())),
            JobState::TimedOut => Some(Err(DeployError::TimedOut {
                job_id: self.job_id,
                after: self.timeout,
            })),
            JobState::Failed => Some(Err(DeployError::Failed {
                job_id: self.job_id,
                reason: self.failure_summary(),
            })),
        }
    }

    /// Human-readable failure line, including the exit code when there is one
    pub fn failure_summary(&self) -> String {
        match (&self.failure, self.exit_code) {
            (Some(FailureReason::NonZeroExit), Some(code)) => format!("exited with code {}", code),
            (Some(reason), _) => reason.to_string(),
            (None, Some(code)) => format!("exited with code {}", code),
            (None, None) => "unknown failure".to_string(),
        }
    }
}

/// Subscription to a job's snapshots
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub service_id: String,
    rx: watch::Receiver<DeployJob>,
}

impl JobHandle {
    pub(crate) fn new(rx: watch::Receiver<DeployJob>) -> Self {
        let (job_id, service_id) = {
            let job = rx.borrow();
            (job.job_id, job.service_id.clone())
        };
        Self { job_id, service_id, rx }
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> DeployJob {
        self.rx.borrow().clone()
    }

    /// Wait until the job reaches a terminal state and return that snapshot
    pub async fn wait_terminal(&mut self) -> DeployJob {
        let terminal = self.rx.wait_for(|job| job.is_terminal()).await.map(|job| job.clone());
        // Writer gone; the last value is all there will ever be
        terminal.unwrap_or_else(|_| self.rx.borrow().clone())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
