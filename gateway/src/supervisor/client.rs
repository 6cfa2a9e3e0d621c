//! Bounded, retrying front for a supervisor transport

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::supervisor::{LogLine, ProcessInfo, ProcessSupervisor, SupervisorError};

/// Supervisor client settings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Upper bound on a single supervisor call
    pub call_timeout: Duration,

    /// Pause before the one retry of a transient failure
    pub retry_backoff: Duration,

    /// Log lines returned when the caller does not ask for a count
    pub default_log_lines: usize,

    /// Hard cap on requested log lines
    pub max_log_lines: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(500),
            default_log_lines: 100,
            max_log_lines: 1000,
        }
    }
}

/// Wraps a transport so that every call is time-bounded and transient
/// failures get exactly one retry.
pub struct SupervisorClient {
    transport: Arc<dyn ProcessSupervisor>,
    options: SupervisorOptions,
}

impl SupervisorClient {
    pub fn new(transport: Arc<dyn ProcessSupervisor>, options: SupervisorOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        let transport = self.transport.clone();
        self.call("list", move || {
            let transport = transport.clone();
            async move { transport.list_processes().await }
        })
        .await
    }

    pub async fn restart(&self, supervisor_process_id: u32) -> Result<(), SupervisorError> {
        let transport = self.transport.clone();
        self.call("restart", move || {
            let transport = transport.clone();
            async move { transport.restart(supervisor_process_id).await }
        })
        .await
    }

    /// Fetch up to `max_lines` recent lines; `None` uses the configured default.
    pub async fn fetch_logs(
        &self,
        supervisor_process_id: u32,
        max_lines: Option<usize>,
    ) -> Result<Vec<LogLine>, SupervisorError> {
        let lines = self.clamp_lines(max_lines);
        let transport = self.transport.clone();
        self.call("logs", move || {
            let transport = transport.clone();
            async move { transport.fetch_logs(supervisor_process_id, lines).await }
        })
        .await
    }

    pub fn clamp_lines(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.options.default_log_lines)
            .clamp(1, self.options.max_log_lines.max(1))
    }

    async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T, SupervisorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SupervisorError>>,
    {
        match self.bounded(op()).await {
            Err(e) if e.is_transient() => {
                warn!(
                    "Supervisor {} failed ({}), retrying in {:?}",
                    what, e, self.options.retry_backoff
                );
                tokio::time::sleep(self.options.retry_backoff).await;
                self.bounded(op()).await
            }
            result => result,
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, SupervisorError>>,
    ) -> Result<T, SupervisorError> {
        match tokio::time::timeout(self.options.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SupervisorError::TimedOut(self.options.call_timeout)),
        }
    }
}
