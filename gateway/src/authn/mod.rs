//! Caller authentication

pub mod identity;
pub mod token;

pub use identity::{Identity, Role};
pub use token::{AuthError, JwtVerifier, TokenClaims, TokenVerifier};
