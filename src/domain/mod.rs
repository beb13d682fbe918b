pub mod entities;
pub mod repositories;

pub use entities::{JobData, JobFilter, JobMeta, JobOutcome, JobRecord, JobStatus};
pub use repositories::JobStore;
