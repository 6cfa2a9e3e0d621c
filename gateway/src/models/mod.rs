//! Domain records read by the gateway

pub mod service;
pub mod user;

pub use service::Service;
pub use user::User;
