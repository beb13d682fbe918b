//! In-process cron timers
//!
//! Purely in-memory: tasks fire on wall-clock cron schedules and are lost on
//! restart. Use the durable job scheduler for anything that must survive one.

pub mod cron_expr;
pub mod presets;
pub mod scheduler;

pub use cron_expr::CronExpression;
pub use presets::TimerPreset;
pub use scheduler::{timer_callback, TaskStatus, TimerCallback, TimerScheduler};
