//! Error types for the operations gateway

use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditError;
use crate::authn::AuthError;
use crate::deploy::DeployError;
use crate::directory::RepositoryError;
use crate::supervisor::SupervisorError;

/// Caller-visible error category. The HTTP layer maps these to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    SupervisorUnavailable,
    DeployNotConfigured,
    DeployAlreadyRunning,
    DeployFailed,
    DeployTimedOut,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SupervisorUnavailable => "supervisor_unavailable",
            ErrorKind::DeployNotConfigured => "deploy_not_configured",
            ErrorKind::DeployAlreadyRunning => "deploy_already_running",
            ErrorKind::DeployFailed => "deploy_failed",
            ErrorKind::DeployTimedOut => "deploy_timed_out",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Supervisor unavailable: {0}")]
    SupervisorUnavailable(#[from] SupervisorError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            GatewayError::Forbidden(_) => ErrorKind::Forbidden,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::SupervisorUnavailable(_) => ErrorKind::SupervisorUnavailable,
            GatewayError::Deploy(e) => e.kind(),
            GatewayError::Repository(_)
            | GatewayError::Audit(_)
            | GatewayError::IoError(_)
            | GatewayError::JsonError(_)
            | GatewayError::ConfigError(_)
            | GatewayError::ServerError(_)
            | GatewayError::ShutdownError(_)
            | GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand back to a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
