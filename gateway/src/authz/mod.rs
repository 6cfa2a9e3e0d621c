//! Capability resolution: may this identity perform this operation on this service?

use std::sync::Arc;

use serde::Serialize;

use crate::authn::{Identity, Role};
use crate::directory::{Assignment, RepositoryError, ServiceDirectory, ServiceRepository};
use crate::errors::GatewayError;
use crate::models::Service;

/// Operations a caller can request against a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    View,
    Restart,
    ViewLogs,
    Deploy,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::View => "view",
            Operation::Restart => "restart",
            Operation::ViewLogs => "view logs",
            Operation::Deploy => "deploy",
        };
        f.write_str(s)
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Admin,
    Assigned,
    NotAssigned,
    AssignmentDiverged,
    ServiceNotFound,
}

/// Transient result of `CapabilityResolver::authorize`. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl AuthorizationDecision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// The single authorization predicate used by every gateway operation
pub struct CapabilityResolver<R: ?Sized> {
    directory: Arc<ServiceDirectory<R>>,
}

impl<R: ServiceRepository + ?Sized> CapabilityResolver<R> {
    pub fn new(directory: Arc<ServiceDirectory<R>>) -> Self {
        Self { directory }
    }

    /// Decide for a service that has already been resolved.
    ///
    /// All operations share one rule: admins may do anything, team users only
    /// what touches a service currently assigned to them.
    pub async fn decide(
        &self,
        identity: &Identity,
        service: &Service,
        _operation: Operation,
    ) -> Result<AuthorizationDecision, RepositoryError> {
        if identity.role == Role::Admin {
            return Ok(AuthorizationDecision::allow(DecisionReason::Admin));
        }

        let decision = match self.directory.assignment(service, &identity.id).await? {
            Assignment::Assigned => AuthorizationDecision::allow(DecisionReason::Assigned),
            Assignment::NotAssigned => AuthorizationDecision::deny(DecisionReason::NotAssigned),
            Assignment::Diverged => AuthorizationDecision::deny(DecisionReason::AssignmentDiverged),
        };
        Ok(decision)
    }

    pub async fn authorize(
        &self,
        identity: &Identity,
        service_id: &str,
        operation: Operation,
    ) -> Result<AuthorizationDecision, RepositoryError> {
        match self.directory.get(service_id).await? {
            Some(service) => self.decide(identity, &service, operation).await,
            None => Ok(AuthorizationDecision::deny(DecisionReason::ServiceNotFound)),
        }
    }

    /// Resolve the service and authorize, mapping a missing service to
    /// `NotFound` and a denial to `Forbidden`.
    pub async fn require(
        &self,
        identity: &Identity,
        service_id: &str,
        operation: Operation,
    ) -> Result<Service, GatewayError> {
        let service = self
            .directory
            .get(service_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("service '{}'", service_id)))?;

        let decision = self.decide(identity, &service, operation).await?;
        if !decision.allowed {
            return Err(GatewayError::Forbidden(format!(
                "not allowed to {} service '{}'",
                operation, service_id
            )));
        }
        Ok(service)
    }
}
