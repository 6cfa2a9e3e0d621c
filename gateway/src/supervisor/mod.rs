//! Process supervisor client
//!
//! The gateway never manages long-running service processes itself. It asks
//! an external supervisor (PM2) to list, restart, and report logs for them.
//! `ProcessSupervisor` hides how that conversation happens; `SupervisorClient`
//! adds the bounded wait and the single retry every caller gets.

pub mod ansi;
pub mod client;
pub mod pm2;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{SupervisorClient, SupervisorOptions};
pub use pm2::Pm2Cli;

/// Errors talking to the supervisor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("supervisor unreachable: {0}")]
    Unreachable(String),

    #[error("`{command}` failed ({status}): {message}")]
    CommandFailed {
        command: String,
        status: String,
        message: String,
    },

    #[error("supervisor call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("invalid supervisor response: {0}")]
    InvalidResponse(String),
}

impl SupervisorError {
    /// Failures worth one more attempt. A supervisor that answered with an
    /// error will answer the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, SupervisorError::Unreachable(_) | SupervisorError::TimedOut(_))
    }
}

/// Process state as reported by the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Online,
    Launching,
    Stopping,
    Stopped,
    Errored,
    OneLaunchStatus,
    WaitingRestart,
    #[serde(other)]
    Unknown,
}

/// One supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub supervisor_id: u32,
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub restarts: u32,
}

/// Which output stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    Unknown,
}

/// A log line returned by the supervisor.
///
/// `captured_at` is when the gateway fetched the line, not when the process
/// wrote it; the supervisor's plain log output carries no emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub captured_at: DateTime<Utc>,
    pub stream: LogStream,
    pub process: Option<String>,
    pub message: String,
}

/// Transport to the external process supervisor
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SupervisorError>;

    async fn restart(&self, supervisor_process_id: u32) -> Result<(), SupervisorError>;

    async fn fetch_logs(
        &self,
        supervisor_process_id: u32,
        max_lines: usize,
    ) -> Result<Vec<LogLine>, SupervisorError>;
}
