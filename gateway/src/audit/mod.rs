//! Audit trail of mutating operations
//!
//! Recording is best-effort: a failing sink is logged locally and never fails
//! the operation that produced the entry.

pub mod jsonl;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::Service;

pub use jsonl::JsonlAuditSink;
pub use memory::MemoryAuditSink;

/// Audit sink failures
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to write audit entry: {0}")]
    Write(String),

    #[error("failed to read audit log: {0}")]
    Read(String),

    #[error("malformed audit entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Kind of audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Restart,
    Deploy,
    DeployResult,
    CancelDeploy,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Restart => "restart",
            AuditAction::Deploy => "deploy",
            AuditAction::DeployResult => "deploy-result",
            AuditAction::CancelDeploy => "cancel-deploy",
        };
        f.write_str(s)
    }
}

/// How the audited action turned out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    Accepted,
    Failed { reason: String },
    TimedOut,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDetails {
    pub service_id: String,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub outcome: AuditOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: String,
    /// `"<action> <service id>"`, e.g. `"restart api"`
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: AuditDetails,
}

impl AuditEntry {
    pub fn new(actor_id: &str, action: AuditAction, service: &Service, job_id: Option<Uuid>, outcome: AuditOutcome) -> Self {
        Self::for_service_id(actor_id, action, &service.id, &service.name, job_id, outcome)
    }

    pub fn for_service_id(
        actor_id: &str,
        action: AuditAction,
        service_id: &str,
        service_name: &str,
        job_id: Option<Uuid>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: format!("{} {}", action, service_id),
            timestamp: Utc::now(),
            details: AuditDetails {
                service_id: service_id.to_string(),
                service_name: service_name.to_string(),
                job_id,
                outcome,
            },
        }
    }
}

/// One page of the audit listing. Out-of-range values fall back to defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditQuery {
    pub limit: usize,
    pub page: usize,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 200;

    pub fn new(limit: Option<i64>, page: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if (1..=Self::MAX_LIMIT as i64).contains(&l) => l as usize,
            _ => Self::DEFAULT_LIMIT,
        };
        let page = match page {
            Some(p) if p >= 1 => p as usize,
            _ => 1,
        };
        Self { limit, page }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Where audit entries go
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Entries newest first
    async fn list(&self, query: AuditQuery) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Best-effort front for an audit sink
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record an entry. Never fails; sink errors only reach the local log.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            warn!(
                "Audit entry dropped ({} by {}): {}",
                entry.action, entry.actor_id, e
            );
        }
    }

    pub async fn list(&self, query: AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        self.sink.list(query).await
    }
}

/// Newest-first page over entries stored oldest first
pub(crate) fn page_newest_first<'a, I>(entries: I, query: AuditQuery) -> Vec<AuditEntry>
where
    I: DoubleEndedIterator<Item = &'a AuditEntry>,
{
    entries
        .rev()
        .skip(query.offset())
        .take(query.limit)
        .cloned()
        .collect()
}
