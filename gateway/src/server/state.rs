//! Server state

use std::sync::Arc;

use crate::authn::TokenVerifier;
use crate::gateway::Gateway;

/// Server state shared across handlers
pub struct ServerState {
    pub gateway: Arc<Gateway>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl ServerState {
    pub fn new(gateway: Arc<Gateway>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { gateway, verifier }
    }
}
