use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Opaque payload handed to a job handler.
pub type JobData = Map<String, Value>;

/// Lifecycle state persisted under `meta.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in-progress",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in-progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    pub status: JobStatus,
    /// Wall-clock duration of the most recent execution.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// A persisted unit of scheduled work.
///
/// Every state change goes through one of the transition methods below so that
/// `meta.status` is always written together with the timestamps it summarises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub data: JobData,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub fail_count: u32,
    pub fail_reason: Option<String>,
    pub repeat_interval: Option<String>,
    pub disabled: bool,
    pub meta: JobMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of one dispatch, applied atomically to the record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Recurring job finished and was re-armed for its next run.
    Rearmed {
        finished_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        duration_ms: u64,
    },
    /// One-shot job finished; the record becomes inert.
    Completed {
        finished_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        finished_at: DateTime<Utc>,
        reason: String,
        duration_ms: u64,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Rearmed { .. } => JobStatus::Pending,
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Error,
        }
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        match self {
            JobOutcome::Rearmed { finished_at, .. }
            | JobOutcome::Completed { finished_at, .. }
            | JobOutcome::Failed { finished_at, .. } => *finished_at,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            JobOutcome::Rearmed { duration_ms, .. }
            | JobOutcome::Completed { duration_ms, .. }
            | JobOutcome::Failed { duration_ms, .. } => *duration_ms,
        }
    }

    /// `nextRunAt` after the outcome is applied.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobOutcome::Rearmed { next_run_at, .. } => Some(*next_run_at),
            _ => None,
        }
    }
}

impl JobRecord {
    pub fn new(
        name: impl Into<String>,
        data: JobData,
        next_run_at: DateTime<Utc>,
        repeat_interval: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            data,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            last_finished_at: None,
            locked_at: None,
            failed_at: None,
            fail_count: 0,
            fail_reason: None,
            repeat_interval,
            disabled: false,
            meta: JobMeta {
                status: JobStatus::Pending,
                duration_ms: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.meta.status
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_interval.is_some()
    }

    /// Whether a lock exists that has not yet outlived `lock_lifetime`.
    pub fn is_locked(&self, now: DateTime<Utc>, lock_lifetime: Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => locked_at > lock_cutoff(now, lock_lifetime),
            None => false,
        }
    }

    /// Due, not disabled, and either unlocked or holding an expired lock.
    pub fn is_eligible(&self, now: DateTime<Utc>, lock_lifetime: Duration) -> bool {
        !self.disabled
            && self.next_run_at.is_some_and(|next| next <= now)
            && !self.is_locked(now, lock_lifetime)
    }

    pub fn mark_claimed(&mut self, now: DateTime<Utc>) {
        self.locked_at = Some(now);
        self.last_run_at = Some(now);
        self.meta.status = JobStatus::InProgress;
        self.updated_at = now;
    }

    pub fn apply_outcome(&mut self, outcome: &JobOutcome) {
        let finished_at = outcome.finished_at();
        self.locked_at = None;
        self.last_finished_at = Some(finished_at);
        self.next_run_at = outcome.next_run_at();
        self.meta.status = outcome.status();
        self.meta.duration_ms = Some(outcome.duration_ms());
        self.updated_at = finished_at;

        if let JobOutcome::Failed { reason, .. } = outcome {
            self.failed_at = Some(finished_at);
            self.fail_count += 1;
            self.fail_reason = Some(reason.clone());
        }
    }

    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.failed_at = None;
        self.fail_count = 0;
        self.fail_reason = None;
        self.locked_at = None;
        self.next_run_at = Some(now);
        self.meta.status = JobStatus::Pending;
        self.updated_at = now;
    }
}

/// Locks taken at or before the returned instant are considered abandoned.
pub fn lock_cutoff(now: DateTime<Utc>, lock_lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lock_lifetime)
        .ok()
        .and_then(|lifetime| now.checked_sub_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Query parameters accepted by `list_jobs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub name: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

impl JobFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.name.as_deref().map_or(true, |name| job.name == name)
            && self.status.map_or(true, |status| job.meta.status == status)
    }
}
