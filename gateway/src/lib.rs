//! opsgate library
//!
//! Authorized operations gateway for PM2-supervised services: list, restart,
//! read logs of, and deploy services, subject to per-user assignment.

pub mod app;
pub mod audit;
pub mod authn;
pub mod authz;
pub mod deploy;
pub mod directory;
pub mod errors;
pub mod filesys;
pub mod gateway;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod supervisor;
pub mod utils;
pub mod workers;
