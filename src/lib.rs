//! Taskforge - durable job scheduling backed by MongoDB
//!
//! This library provides the store-backed job scheduler, the in-process cron
//! timer scheduler, and the thin HTTP surface that exposes both.

use std::sync::Arc;

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod infrastructure;
pub mod routes;

// Re-export commonly used types
pub use error::{AppError, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub env: Arc<config::Config>,
    pub scheduler: crate::core::jobs::JobScheduler,
    pub timers: Arc<crate::core::timers::TimerScheduler>,
}
