//! User records

use serde::{Deserialize, Serialize};

use crate::authn::Role;

/// A console user as stored by the user repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    pub username: String,

    pub role: Role,

    /// Services this user believes it is assigned to. Only used to detect
    /// divergence from `Service::assigned_user_ids`.
    #[serde(default, alias = "assigned_services")]
    pub assigned_service_ids: Vec<String>,
}

impl User {
    pub fn lists_service(&self, service_id: &str) -> bool {
        self.assigned_service_ids.iter().any(|id| id == service_id)
    }
}
