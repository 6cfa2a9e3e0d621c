//! JSON-file backed repository

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::{RepositoryError, ServiceFilter, ServiceRepository};
use crate::filesys::file::File;
use crate::models::{Service, User};

/// Full contents of the directory file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub users: Vec<User>,
}

impl DirectorySnapshot {
    /// Reject snapshots with duplicate ids or shared supervisor process ids
    pub fn validate(&self) -> Result<(), RepositoryError> {
        let mut service_ids = HashSet::new();
        let mut process_ids = HashSet::new();
        for service in &self.services {
            if !service_ids.insert(service.id.as_str()) {
                return Err(RepositoryError::Integrity(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
            if !process_ids.insert(service.supervisor_process_id) {
                return Err(RepositoryError::Integrity(format!(
                    "supervisor process id {} is used by more than one service",
                    service.supervisor_process_id
                )));
            }
        }

        let mut user_ids = HashSet::new();
        for user in &self.users {
            if !user_ids.insert(user.id.as_str()) {
                return Err(RepositoryError::Integrity(format!(
                    "duplicate user id '{}'",
                    user.id
                )));
            }
        }

        Ok(())
    }
}

/// In-memory repository loaded from a JSON snapshot, reloadable in place
pub struct SnapshotRepository {
    source: Option<File>,
    snapshot: RwLock<DirectorySnapshot>,
}

impl SnapshotRepository {
    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Result<Self, RepositoryError> {
        snapshot.validate()?;
        Ok(Self {
            source: None,
            snapshot: RwLock::new(snapshot),
        })
    }

    pub async fn load(file: File) -> Result<Self, RepositoryError> {
        let snapshot = read_snapshot(&file).await?;
        info!(
            "Loaded directory from {}: {} services, {} users",
            file.path().display(),
            snapshot.services.len(),
            snapshot.users.len()
        );
        Ok(Self {
            source: Some(file),
            snapshot: RwLock::new(snapshot),
        })
    }

    /// Re-read the backing file. The current snapshot is kept if the new one is invalid.
    pub async fn reload(&self) -> Result<(), RepositoryError> {
        let Some(file) = &self.source else {
            return Ok(());
        };
        let snapshot = read_snapshot(file).await?;
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *current = snapshot;
        Ok(())
    }

    /// Replace the snapshot wholesale
    pub fn replace(&self, snapshot: DirectorySnapshot) -> Result<(), RepositoryError> {
        snapshot.validate()?;
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *current = snapshot;
        Ok(())
    }
}

async fn read_snapshot(file: &File) -> Result<DirectorySnapshot, RepositoryError> {
    let snapshot: DirectorySnapshot = file
        .read_json()
        .await
        .map_err(|e| RepositoryError::Load(format!("{}: {}", file.path().display(), e)))?;
    snapshot.validate()?;
    Ok(snapshot)
}

#[async_trait]
impl ServiceRepository for SnapshotRepository {
    async fn get_service(&self, id: &str) -> Result<Option<Service>, RepositoryError> {
        let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Ok(snapshot.services.iter().find(|s| s.id == id).cloned())
    }

    async fn list_services(&self, filter: ServiceFilter) -> Result<Vec<Service>, RepositoryError> {
        let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        let services = match filter {
            ServiceFilter::All => snapshot.services.clone(),
            ServiceFilter::AssignedTo(user_id) => snapshot
                .services
                .iter()
                .filter(|s| s.is_assigned_to(&user_id))
                .cloned()
                .collect(),
        };
        Ok(services)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, RepositoryError> {
        let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Ok(snapshot.users.iter().find(|u| u.id == id).cloned())
    }
}
