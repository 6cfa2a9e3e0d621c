//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::deploy::RunnerSettings;
use crate::logs::LogLevel;
use crate::supervisor::SupervisorOptions;

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/opsgate/settings.json";

/// Gateway settings. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// HTTP listener
    #[serde(default)]
    pub server: ServerSettings,

    /// Token verification
    #[serde(default)]
    pub auth: AuthSettings,

    /// JSON snapshot of services and users
    #[serde(default = "default_directory_file")]
    pub directory_file: PathBuf,

    /// JSON-lines audit file. Audit entries are kept in memory when unset.
    #[serde(default)]
    pub audit_file: Option<PathBuf>,

    /// Process supervisor
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Deploy jobs
    #[serde(default)]
    pub deploy: DeploySettings,
}

fn default_directory_file() -> PathBuf {
    PathBuf::from("/etc/opsgate/directory.json")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            directory_file: default_directory_file(),
            audit_file: None,
            supervisor: SupervisorSettings::default(),
            deploy: DeploySettings::default(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Token verification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret shared with the token issuer. Falls back to `OPSGATE_JWT_SECRET`.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub jwt_secret: Option<SecretString>,
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// pm2 executable
    #[serde(default = "default_pm2_bin")]
    pub pm2_bin: PathBuf,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_log_lines")]
    pub default_log_lines: usize,

    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
}

fn default_pm2_bin() -> PathBuf {
    PathBuf::from("pm2")
}

fn default_call_timeout() -> u64 {
    10
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_log_lines() -> usize {
    100
}

fn default_max_log_lines() -> usize {
    1000
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            pm2_bin: default_pm2_bin(),
            call_timeout_secs: default_call_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            default_log_lines: default_log_lines(),
            max_log_lines: default_max_log_lines(),
        }
    }
}

impl SupervisorSettings {
    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            default_log_lines: self.default_log_lines,
            max_log_lines: self.max_log_lines,
        }
    }
}

/// Deploy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    #[serde(default = "default_deploy_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,

    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,

    /// Fixed working directory for every script
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    #[serde(default = "default_history")]
    pub history_per_service: usize,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

fn default_deploy_timeout() -> u64 {
    300
}

fn default_kill_grace() -> u64 {
    5
}

fn default_output_cap() -> usize {
    64 * 1024
}

fn default_retention() -> u64 {
    3600
}

fn default_history() -> usize {
    10
}

fn default_reaper_interval() -> u64 {
    60
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_deploy_timeout(),
            kill_grace_secs: default_kill_grace(),
            output_cap_bytes: default_output_cap(),
            working_dir: None,
            retention_secs: default_retention(),
            history_per_service: default_history(),
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

impl DeploySettings {
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            kill_grace: Duration::from_secs(self.kill_grace_secs),
            output_cap_bytes: self.output_cap_bytes,
            working_dir: self.working_dir.clone(),
            retention: Duration::from_secs(self.retention_secs),
            history_per_service: self.history_per_service,
            ..RunnerSettings::default()
        }
    }
}
