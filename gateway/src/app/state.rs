//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::audit::{AuditSink, Auditor, JsonlAuditSink, MemoryAuditSink};
use crate::authn::{JwtVerifier, TokenVerifier};
use crate::directory::SnapshotRepository;
use crate::errors::GatewayError;
use crate::filesys::file::File;
use crate::gateway::Gateway;
use crate::supervisor::{Pm2Cli, SupervisorClient};

/// Main application state
pub struct AppState {
    /// Loaded service directory
    pub directory: Arc<SnapshotRepository>,

    /// Gateway facade
    pub gateway: Arc<Gateway>,

    /// Bearer token verifier
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, GatewayError> {
        info!("Initializing application state...");

        let directory = Arc::new(SnapshotRepository::load(File::new(&options.directory_file)).await?);

        let sink: Arc<dyn AuditSink> = match &options.audit_file {
            Some(path) => {
                info!("Writing audit entries to {}", path.display());
                Arc::new(JsonlAuditSink::new(File::new(path)))
            }
            None => {
                info!("No audit file configured, keeping audit entries in memory");
                Arc::new(MemoryAuditSink::new())
            }
        };

        let supervisor = SupervisorClient::new(
            Arc::new(Pm2Cli::new(options.pm2_bin.clone())),
            options.supervisor.clone(),
        );

        let gateway = Arc::new(Gateway::new(
            directory.clone(),
            supervisor,
            options.deploy.clone(),
            Auditor::new(sink),
        ));

        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(options.jwt_secret.clone()));

        Ok(Self {
            directory,
            gateway,
            verifier,
        })
    }

    /// Shutdown application state: cancel running deploys
    pub async fn shutdown(&self, deploy_drain: std::time::Duration) {
        info!("Shutting down application state...");
        self.gateway.runner().shutdown(deploy_drain).await;
    }
}
