//! Scheduling engines
//!
//! `jobs` is the durable, store-backed scheduler; `timers` is the in-memory
//! cron scheduler. The two share nothing but the error type.

pub mod jobs;
pub mod timers;
