pub mod job;

pub use job::{lock_cutoff, JobData, JobFilter, JobMeta, JobOutcome, JobRecord, JobStatus};
