//! Background workers

pub mod job_reaper;
