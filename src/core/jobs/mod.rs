//! Durable job scheduling
//!
//! Jobs are persisted through a [`JobStore`](crate::domain::JobStore), claimed
//! by a poll loop with an atomic conditional update, and dispatched to handlers
//! registered by name.

pub mod handlers;
mod poller;
pub mod registry;
pub mod schedule;
pub mod scheduler;

pub use handlers::register_builtin_handlers;
pub use registry::{HandlerOptions, HandlerRegistry, JobContext, JobHandler};
pub use schedule::{parse_interval, RunAt};
pub use scheduler::JobScheduler;
