//! Gateway API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `deploy_already_running`
    pub code: String,
    pub message: String,
}

/// Service list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceListResponse<S> {
    pub services: Vec<S>,
    pub total: usize,
}

/// Restart acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartResponse {
    pub service_id: String,
    pub restarted_at: DateTime<Utc>,
}

/// Captured supervisor log lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse<L> {
    pub service_id: String,
    pub lines: Vec<L>,
}

/// Returned with 202 when a deploy is queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAcceptedResponse {
    pub job_id: Uuid,
    pub service_id: String,
    pub state: String,
    /// Where to poll for the outcome
    pub status_url: String,
}

/// Process list (admin)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessListResponse<P> {
    pub processes: Vec<P>,
    pub total: usize,
}

/// Pagination actually applied to a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub page: usize,
}

/// Audit listing (admin)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogResponse<E> {
    pub logs: Vec<E>,
    pub pagination: Pagination,
}
