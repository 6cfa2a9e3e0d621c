//! Gateway facade: the operations exposed to callers
//!
//! Every operation takes the caller's `Identity` explicitly. This is the only
//! place authorization and auditing are wired in.

pub mod view;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditOutcome, AuditQuery, Auditor};
use crate::authn::Identity;
use crate::authz::{CapabilityResolver, Operation};
use crate::deploy::{DeployError, DeployJob, DeployObserver, DeployRunner, JobHandle, JobState, RunnerSettings};
use crate::directory::{ServiceDirectory, ServiceRepository};
use crate::errors::GatewayError;
use crate::supervisor::{LogLine, ProcessInfo, SupervisorClient};

pub use view::ServiceSummary;

/// Records the final outcome of every deploy job
struct DeployAuditor {
    auditor: Auditor,
}

#[async_trait]
impl DeployObserver for DeployAuditor {
    async fn job_finished(&self, job: &DeployJob) {
        let outcome = match job.state {
            JobState::Succeeded => AuditOutcome::Succeeded,
            JobState::TimedOut => AuditOutcome::TimedOut,
            _ => AuditOutcome::Failed {
                reason: job.failure_summary(),
            },
        };
        let entry = AuditEntry::for_service_id(
            &job.requested_by,
            AuditAction::DeployResult,
            &job.service_id,
            &job.service_name,
            Some(job.job_id),
            outcome,
        );
        self.auditor.record(entry).await;
    }
}

pub struct Gateway {
    directory: Arc<ServiceDirectory<dyn ServiceRepository>>,
    resolver: CapabilityResolver<dyn ServiceRepository>,
    supervisor: SupervisorClient,
    runner: DeployRunner,
    auditor: Auditor,
}

impl Gateway {
    pub fn new(
        repo: Arc<dyn ServiceRepository>,
        supervisor: SupervisorClient,
        deploy_settings: RunnerSettings,
        auditor: Auditor,
    ) -> Self {
        let directory = Arc::new(ServiceDirectory::new(repo));
        let observer = Arc::new(DeployAuditor {
            auditor: auditor.clone(),
        });

        Self {
            resolver: CapabilityResolver::new(directory.clone()),
            directory,
            supervisor,
            runner: DeployRunner::new(deploy_settings, Some(observer)),
            auditor,
        }
    }

    pub fn runner(&self) -> &DeployRunner {
        &self.runner
    }

    /// Services visible to the caller, with their supervisor status when the
    /// supervisor answers.
    pub async fn list_services(&self, identity: &Identity) -> Result<Vec<ServiceSummary>, GatewayError> {
        let services = self.directory.list_visible(identity).await?;

        let statuses: HashMap<u32, ProcessInfo> = match self.supervisor.list_processes().await {
            Ok(processes) => processes.into_iter().map(|p| (p.supervisor_id, p)).collect(),
            Err(e) => {
                warn!("Listing services without process status: {}", e);
                HashMap::new()
            }
        };

        Ok(services
            .iter()
            .map(|service| {
                ServiceSummary::new(
                    service,
                    statuses.get(&service.supervisor_process_id),
                    self.runner.active_job(&service.id),
                )
            })
            .collect())
    }

    pub async fn restart(&self, identity: &Identity, service_id: &str) -> Result<(), GatewayError> {
        let service = self.resolver.require(identity, service_id, Operation::Restart).await?;

        info!("{} restarting service {} (pm2 id {})", identity.id, service.id, service.supervisor_process_id);
        let result = self.supervisor.restart(service.supervisor_process_id).await;

        let outcome = match &result {
            Ok(()) => AuditOutcome::Succeeded,
            Err(e) => AuditOutcome::Failed { reason: e.to_string() },
        };
        self.auditor
            .record(AuditEntry::new(&identity.id, AuditAction::Restart, &service, None, outcome))
            .await;

        result.map_err(GatewayError::from)
    }

    pub async fn get_logs(
        &self,
        identity: &Identity,
        service_id: &str,
        lines: Option<usize>,
    ) -> Result<Vec<LogLine>, GatewayError> {
        let service = self.resolver.require(identity, service_id, Operation::ViewLogs).await?;
        let logs = self
            .supervisor
            .fetch_logs(service.supervisor_process_id, lines)
            .await?;
        Ok(logs)
    }

    /// Start a deploy. Returns as soon as the job is queued; the outcome is
    /// learned from `deploy_status` or the returned handle.
    pub async fn deploy(&self, identity: &Identity, service_id: &str) -> Result<JobHandle, GatewayError> {
        let service = self.resolver.require(identity, service_id, Operation::Deploy).await?;

        let result = self.runner.start_deploy(&service, &identity.id);
        let (job_id, outcome) = match &result {
            Ok(handle) => (Some(handle.job_id), AuditOutcome::Accepted),
            Err(e) => (None, AuditOutcome::Rejected { reason: e.to_string() }),
        };
        self.auditor
            .record(AuditEntry::new(&identity.id, AuditAction::Deploy, &service, job_id, outcome))
            .await;

        result.map_err(GatewayError::from)
    }

    pub async fn deploy_status(&self, identity: &Identity, job_id: Uuid) -> Result<DeployJob, GatewayError> {
        let job = self
            .runner
            .get_status(job_id)
            .ok_or(DeployError::JobNotFound(job_id))?;
        self.resolver.require(identity, &job.service_id, Operation::View).await?;
        Ok(job)
    }

    /// Cancel a job and wait briefly for it to settle. Returns the latest snapshot.
    pub async fn cancel_deploy(&self, identity: &Identity, job_id: Uuid) -> Result<DeployJob, GatewayError> {
        let job = self
            .runner
            .get_status(job_id)
            .ok_or(DeployError::JobNotFound(job_id))?;
        let service = self.resolver.require(identity, &job.service_id, Operation::Deploy).await?;

        let before = self.runner.cancel(job_id)?;
        if before.is_terminal() {
            return Ok(before);
        }

        self.auditor
            .record(AuditEntry::new(
                &identity.id,
                AuditAction::CancelDeploy,
                &service,
                Some(job_id),
                AuditOutcome::Accepted,
            ))
            .await;

        let Some(mut handle) = self.runner.subscribe(job_id) else {
            return Ok(before);
        };
        let settings = self.runner.settings();
        let settle = settings.kill_grace + settings.drain_window + Duration::from_secs(1);
        match tokio::time::timeout(settle, handle.wait_terminal()).await {
            Ok(job) => Ok(job),
            Err(_) => Ok(handle.snapshot()),
        }
    }

    /// Raw supervisor process list. Admin only.
    pub async fn list_processes(&self, identity: &Identity) -> Result<Vec<ProcessInfo>, GatewayError> {
        require_admin(identity, "list processes")?;
        Ok(self.supervisor.list_processes().await?)
    }

    /// Audit listing, newest first. Admin only.
    pub async fn audit_log(&self, identity: &Identity, query: AuditQuery) -> Result<Vec<AuditEntry>, GatewayError> {
        require_admin(identity, "read the audit log")?;
        Ok(self.auditor.list(query).await?)
    }
}

fn require_admin(identity: &Identity, what: &str) -> Result<(), GatewayError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(format!("only admins may {}", what)))
    }
}
