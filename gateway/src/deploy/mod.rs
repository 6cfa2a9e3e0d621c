//! Deploy job runner: runs a service's deploy script as a tracked child process

pub mod capture;
pub mod fsm;
pub mod job;
pub mod process;
pub mod runner;

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::errors::ErrorKind;

pub use fsm::{JobEvent, JobState};
pub use job::{DeployJob, FailureReason, JobHandle};
pub use runner::{DeployObserver, DeployRunner, RunnerSettings};

/// Deploy failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("service {service_id} has no deploy script configured")]
    NotConfigured { service_id: String },

    #[error("a deploy for service {service_id} is already running (job {job_id})")]
    AlreadyRunning { service_id: String, job_id: Uuid },

    #[error("deploy job {0} not found")]
    JobNotFound(Uuid),

    #[error("deploy job {job_id} failed: {reason}")]
    Failed { job_id: Uuid, reason: String },

    #[error("deploy job {job_id} timed out after {after:?}")]
    TimedOut { job_id: Uuid, after: Duration },

    #[error("deploy runner is shutting down")]
    ShuttingDown,
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::NotConfigured { .. } => ErrorKind::DeployNotConfigured,
            DeployError::AlreadyRunning { .. } => ErrorKind::DeployAlreadyRunning,
            DeployError::JobNotFound(_) => ErrorKind::NotFound,
            DeployError::Failed { .. } => ErrorKind::DeployFailed,
            DeployError::TimedOut { .. } => ErrorKind::DeployTimedOut,
            DeployError::ShuttingDown => ErrorKind::Internal,
        }
    }
}
