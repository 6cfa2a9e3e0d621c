//! Caller-facing service view

use serde::Serialize;
use uuid::Uuid;

use crate::models::Service;
use crate::supervisor::{ProcessInfo, ProcessStatus};

/// A service as shown to a caller. Assignment lists stay server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub supervisor_process_id: u32,
    pub deployable: bool,
    /// `None` when the supervisor did not answer or does not know the process
    pub status: Option<ProcessStatus>,
    pub active_deploy: Option<Uuid>,
}

impl ServiceSummary {
    pub fn new(service: &Service, process: Option<&ProcessInfo>, active_deploy: Option<Uuid>) -> Self {
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            description: service.description.clone(),
            supervisor_process_id: service.supervisor_process_id,
            deployable: service.deploy_script_path.is_some(),
            status: process.map(|p| p.status.clone()),
            active_deploy,
        }
    }
}
