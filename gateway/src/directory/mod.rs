//! Service directory: read-only view over service and user records

pub mod snapshot;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::authn::Identity;
use crate::models::{Service, User};

pub use snapshot::{DirectorySnapshot, SnapshotRepository};

/// Repository failures
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("failed to load directory: {0}")]
    Load(String),

    #[error("directory integrity violation: {0}")]
    Integrity(String),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Which services to return from `ServiceRepository::list_services`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFilter {
    All,
    /// Services whose `assigned_user_ids` contains this user
    AssignedTo(String),
}

/// Narrow read interface to the persistent store of services and users
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn get_service(&self, id: &str) -> Result<Option<Service>, RepositoryError>;

    async fn list_services(&self, filter: ServiceFilter) -> Result<Vec<Service>, RepositoryError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, RepositoryError>;
}

/// Outcome of checking the assignment relation from both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Assigned,
    NotAssigned,
    /// The service and user records disagree. Treated as not assigned.
    Diverged,
}

/// Answers visibility and assignment questions against current repository state.
///
/// Nothing is cached: every call reads the repository, so a revoked
/// assignment takes effect on the next request.
pub struct ServiceDirectory<R: ?Sized> {
    repo: std::sync::Arc<R>,
}

impl<R: ServiceRepository + ?Sized> ServiceDirectory<R> {
    pub fn new(repo: std::sync::Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, service_id: &str) -> Result<Option<Service>, RepositoryError> {
        self.repo.get_service(service_id).await
    }

    /// Services the identity may see. Admins get everything in repository
    /// order; team users get their assigned services in assignment order.
    pub async fn list_visible(&self, identity: &Identity) -> Result<Vec<Service>, RepositoryError> {
        if identity.is_admin() {
            return self.repo.list_services(ServiceFilter::All).await;
        }

        let candidates = self
            .repo
            .list_services(ServiceFilter::AssignedTo(identity.id.clone()))
            .await?;

        let Some(user) = self.repo.get_user(&identity.id).await? else {
            return Ok(candidates);
        };

        let mut visible: Vec<Service> = candidates
            .into_iter()
            .filter(|service| check_pair(service, Some(&user), &identity.id) == Assignment::Assigned)
            .collect();

        visible.sort_by_key(|service| {
            user.assigned_service_ids
                .iter()
                .position(|id| id == &service.id)
                .unwrap_or(usize::MAX)
        });

        Ok(visible)
    }

    /// Check the relation for an already-resolved service
    pub async fn assignment(&self, service: &Service, user_id: &str) -> Result<Assignment, RepositoryError> {
        let user = self.repo.get_user(user_id).await?;
        Ok(check_pair(service, user.as_ref(), user_id))
    }

    pub async fn is_assigned(&self, service_id: &str, user_id: &str) -> Result<bool, RepositoryError> {
        match self.repo.get_service(service_id).await? {
            Some(service) => Ok(self.assignment(&service, user_id).await? == Assignment::Assigned),
            None => Ok(false),
        }
    }
}

fn check_pair(service: &Service, user: Option<&User>, user_id: &str) -> Assignment {
    let service_side = service.is_assigned_to(user_id);

    let Some(user) = user else {
        return if service_side {
            Assignment::Assigned
        } else {
            Assignment::NotAssigned
        };
    };

    match (service_side, user.lists_service(&service.id)) {
        (true, true) => Assignment::Assigned,
        (false, false) => Assignment::NotAssigned,
        (service_side, user_side) => {
            warn!(
                service_id = %service.id,
                user_id = %user_id,
                service_side,
                user_side,
                "Assignment records diverge between service and user, denying access"
            );
            Assignment::Diverged
        }
    }
}
