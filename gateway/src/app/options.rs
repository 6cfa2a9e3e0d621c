//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::RunnerSettings;
use crate::storage::settings::{ServerSettings, Settings};
use crate::supervisor::SupervisorOptions;
use crate::workers::job_reaper;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// HTTP listener
    pub server: ServerSettings,

    /// Enable the HTTP server
    pub enable_server: bool,

    /// JSON snapshot of services and users
    pub directory_file: PathBuf,

    /// JSON-lines audit file. In-memory audit when unset.
    pub audit_file: Option<PathBuf>,

    /// HS256 token secret
    pub jwt_secret: SecretString,

    /// pm2 executable
    pub pm2_bin: PathBuf,

    /// Supervisor client options
    pub supervisor: SupervisorOptions,

    /// Deploy runner settings
    pub deploy: RunnerSettings,

    /// Job reaper worker options
    pub job_reaper: job_reaper::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, jwt_secret: SecretString) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: settings.server.clone(),
            enable_server: true,
            directory_file: settings.directory_file.clone(),
            audit_file: settings.audit_file.clone(),
            jwt_secret,
            pm2_bin: settings.supervisor.pm2_bin.clone(),
            supervisor: settings.supervisor.options(),
            deploy: settings.deploy.runner_settings(),
            job_reaper: job_reaper::Options {
                interval: Duration::from_secs(settings.deploy.reaper_interval_secs.max(1)),
            },
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long active deploys get to wind down on shutdown
    pub deploy_drain: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            deploy_drain: Duration::from_secs(15),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
