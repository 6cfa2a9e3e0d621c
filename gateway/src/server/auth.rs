//! Bearer authentication for handlers

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::authn::{token::bearer_token, Identity};
use crate::errors::GatewayError;
use crate::server::error::ApiError;
use crate::server::state::ServerState;

/// The verified identity behind a request
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

impl FromRequestParts<Arc<ServerState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ServerState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let identity = bearer_token(header)
            .and_then(|token| state.verifier.verify(token))
            .map_err(|e| {
                debug!("Rejected request to {}: {}", parts.uri.path(), e);
                ApiError::from(GatewayError::from(e))
            })?;

        Ok(Caller(identity))
    }
}
