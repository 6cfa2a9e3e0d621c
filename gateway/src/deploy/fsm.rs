//! Finite state machine for deploy jobs

use serde::{Deserialize, Serialize};

/// Deploy job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, child not yet spawned
    Queued,

    /// Child process is running
    Running,

    /// Script exited with code 0
    Succeeded,

    /// Script exited nonzero, was killed, could not be spawned, or was cancelled
    Failed,

    /// Wall-clock limit reached; the process group was terminated
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        }
    }
}

/// Deploy job event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Child spawned
    Started { pid: Option<u32> },

    /// Child could not be spawned
    SpawnFailed(String),

    /// Child exited on its own. `code` is `None` when it died from a signal.
    Exited { code: Option<i32>, signal: Option<i32> },

    /// Waiting on the child failed
    WaitFailed(String),

    /// Timeout fired and the child was terminated
    TimedOut,

    /// Cancellation requested and the child (if any) was terminated
    Cancelled,
}

/// Compute the state that `event` moves a job in `state` to
pub fn next_state(state: JobState, event: &JobEvent) -> Result<JobState, String> {
    let next = match (state, event) {
        // From Queued
        (JobState::Queued, JobEvent::Started { .. }) => JobState::Running,
        (JobState::Queued, JobEvent::SpawnFailed(_)) => JobState::Failed,
        (JobState::Queued, JobEvent::Cancelled) => JobState::Failed,
        (JobState::Queued, JobEvent::WaitFailed(_)) => JobState::Failed,

        // From Running
        (JobState::Running, JobEvent::Exited { code: Some(0), .. }) => JobState::Succeeded,
        (JobState::Running, JobEvent::Exited { .. }) => JobState::Failed,
        (JobState::Running, JobEvent::WaitFailed(_)) => JobState::Failed,
        (JobState::Running, JobEvent::TimedOut) => JobState::TimedOut,
        (JobState::Running, JobEvent::Cancelled) => JobState::Failed,

        // Terminal states are final
        (state, event) => {
            return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
        }
    };

    Ok(next)
}
