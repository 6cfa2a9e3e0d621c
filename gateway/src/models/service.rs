//! Service records

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named service backed by a process under the external supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Unique service ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Optional free-form description
    #[serde(default, alias = "desc")]
    pub description: Option<String>,

    /// The supervisor's reference for the process (PM2 id). Unique across services.
    #[serde(alias = "pm2_id")]
    pub supervisor_process_id: u32,

    /// Executable run on deploy, if the service supports deploys
    #[serde(default)]
    pub deploy_script_path: Option<PathBuf>,

    /// Team users granted access. Authoritative side of the assignment relation.
    #[serde(default, alias = "assigned_users")]
    pub assigned_user_ids: Vec<String>,
}

impl Service {
    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.assigned_user_ids.iter().any(|id| id == user_id)
    }
}
