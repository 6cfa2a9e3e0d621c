//! Wire models for the opsgate HTTP API

pub mod models;
