//! Mapping gateway errors onto HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openapi_server::models::ErrorResponse;
use tracing::error;

use crate::errors::{ErrorKind, GatewayError};

/// Status code plus `{code, message}` body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::SupervisorUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::DeployNotConfigured | ErrorKind::DeployAlreadyRunning => StatusCode::CONFLICT,
        ErrorKind::DeployFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::DeployTimedOut => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            // Details stay in the server log
            error!("Request failed: {}", err);
        }
        ApiError {
            status: status_for(kind),
            body: ErrorResponse {
                code: kind.code().to_string(),
                message: err.public_message(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
