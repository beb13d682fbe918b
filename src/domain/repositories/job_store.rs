use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::entities::{JobFilter, JobOutcome, JobRecord},
    error::Result,
};

/// Durable backing store for job records.
///
/// Every mutating method is a single conditional update on one record: the
/// scheduler never reads a record and then writes it back. `lock_cutoff` is the
/// instant at or before which an existing `lockedAt` counts as expired.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create indexes / verify connectivity. Called once during initialization.
    async fn prepare(&self) -> Result<()>;

    async fn insert(&self, job: &JobRecord) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Records matching `filter`, ordered by `nextRunAt`.
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>>;

    /// Claim candidates among `names`: due, enabled, and unlocked (or holding
    /// an expired lock). Jobs for other names are left for whichever process
    /// registers their handler.
    async fn find_due(
        &self,
        names: &[String],
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>>;

    /// Atomically lock `id` if it is still eligible. Returns the claimed record,
    /// or `None` when another poller got there first.
    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
    ) -> Result<Option<JobRecord>>;

    /// Apply `outcome` if the record still carries the lock taken at `claimed_at`.
    /// Returns `false` when the record was removed or re-claimed meanwhile.
    async fn finish(&self, id: &str, claimed_at: DateTime<Utc>, outcome: &JobOutcome)
        -> Result<bool>;

    /// Clear failure bookkeeping and make the job due at `now`, unless it holds
    /// a live lock. `None` means not found or locked.
    async fn reset_for_retry(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
    ) -> Result<Option<JobRecord>>;

    async fn set_disabled(&self, id: &str, disabled: bool) -> Result<Option<JobRecord>>;

    /// Remove the record regardless of lock state.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove inert one-shot jobs in `completed` state.
    async fn purge_completed(&self) -> Result<u64>;
}
