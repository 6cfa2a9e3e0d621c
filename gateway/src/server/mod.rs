//! HTTP surface over the gateway

pub mod auth;
pub mod error;
pub mod handlers;
pub mod serve;
pub mod state;
