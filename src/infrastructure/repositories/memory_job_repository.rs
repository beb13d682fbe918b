use crate::{
    domain::{
        entities::{JobFilter, JobOutcome, JobRecord, JobStatus},
        repositories::JobStore,
    },
    error::Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local [`JobStore`] used by tests and `SCHEDULER_STORE=memory`.
///
/// Each mutating call runs under the write lock, which gives the same
/// single-record atomicity the Mongo repository gets from `findOneAndUpdate`.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn unlocked(job: &JobRecord, lock_cutoff: DateTime<Utc>) -> bool {
    job.locked_at.map_or(true, |locked_at| locked_at <= lock_cutoff)
}

fn eligible(job: &JobRecord, now: DateTime<Utc>, lock_cutoff: DateTime<Utc>) -> bool {
    !job.disabled && job.next_run_at.is_some_and(|next| next <= now) && unlocked(job, lock_cutoff)
}

fn sort_by_next_run(jobs: &mut [JobRecord]) {
    // Records without a next run sort last, like nulls in a descending Mongo index.
    jobs.sort_by(|a, b| match (a.next_run_at, b.next_run_at) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.created_at.cmp(&b.created_at)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.created_at.cmp(&b.created_at),
    });
}

fn truncate(mut jobs: Vec<JobRecord>, limit: Option<i64>) -> Vec<JobRecord> {
    if let Some(limit) = limit.filter(|l| *l > 0) {
        jobs.truncate(limit as usize);
    }
    jobs
}

#[async_trait]
impl JobStore for InMemoryJobRepository {
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, job: &JobRecord) -> Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        sort_by_next_run(&mut jobs);
        Ok(truncate(jobs, filter.limit))
    }

    async fn find_due(
        &self,
        names: &[String],
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| names.contains(&job.name) && eligible(job, now, lock_cutoff))
            .cloned()
            .collect();
        sort_by_next_run(&mut jobs);
        Ok(truncate(jobs, Some(limit)))
    }

    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if eligible(job, now, lock_cutoff) => {
                job.mark_claimed(now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finish(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        outcome: &JobOutcome,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if job.locked_at == Some(claimed_at) => {
                job.apply_outcome(outcome);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_for_retry(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if unlocked(job, lock_cutoff) => {
                job.reset_for_retry(now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_disabled(&self, id: &str, disabled: bool) -> Result<Option<JobRecord>> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs.get_mut(id).map(|job| {
            job.disabled = disabled;
            job.updated_at = Utc::now();
            job.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }

    async fn purge_completed(&self) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.meta.status == JobStatus::Completed && !job.is_recurring()));
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{lock_cutoff, JobData};
    use std::sync::Arc;
    use std::time::Duration;

    const LOCK_LIFETIME: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let job = JobRecord::new("send-email", JobData::new(), Utc::now(), None);
        repo.insert(&job).await.unwrap();

        let now = Utc::now();
        let cutoff = lock_cutoff(now, LOCK_LIFETIME);
        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let repo = Arc::clone(&repo);
                let id = job.id.clone();
                tokio::spawn(async move { repo.claim(&id, now, cutoff).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let stored = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::InProgress);
        assert_eq!(stored.locked_at, Some(now));
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimable() {
        let repo = InMemoryJobRepository::new();
        let job = JobRecord::new("report", JobData::new(), Utc::now(), None);
        repo.insert(&job).await.unwrap();

        let first = Utc::now();
        assert!(repo
            .claim(&job.id, first, lock_cutoff(first, LOCK_LIFETIME))
            .await
            .unwrap()
            .is_some());

        let later = first + chrono::Duration::minutes(11);
        let reclaimed = repo
            .claim(&job.id, later, lock_cutoff(later, LOCK_LIFETIME))
            .await
            .unwrap();
        assert!(reclaimed.is_some());

        // The original claimant's completion must not clear the new lock.
        let stale = JobOutcome::Completed {
            finished_at: later,
            duration_ms: 1,
        };
        assert!(!repo.finish(&job.id, first, &stale).await.unwrap());
        assert!(repo.finish(&job.id, later, &stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_due_skips_future_and_disabled() {
        let repo = InMemoryJobRepository::new();
        let now = Utc::now();
        let due = JobRecord::new("a", JobData::new(), now, None);
        let future = JobRecord::new("b", JobData::new(), now + chrono::Duration::hours(1), None);
        let mut disabled = JobRecord::new("c", JobData::new(), now, None);
        disabled.disabled = true;

        for job in [&due, &future, &disabled] {
            repo.insert(job).await.unwrap();
        }

        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = repo
            .find_due(&names, now, lock_cutoff(now, LOCK_LIFETIME), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        let unrelated = repo
            .find_due(&["z".to_string()], now, lock_cutoff(now, LOCK_LIFETIME), 10)
            .await
            .unwrap();
        assert!(unrelated.is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_recurring_and_pending() {
        let repo = InMemoryJobRepository::new();
        let now = Utc::now();

        let mut done = JobRecord::new("once", JobData::new(), now, None);
        done.mark_claimed(now);
        done.apply_outcome(&JobOutcome::Completed {
            finished_at: now,
            duration_ms: 1,
        });
        let pending = JobRecord::new("later", JobData::new(), now, None);
        let recurring = JobRecord::new("tick", JobData::new(), now, Some("1 hour".into()));

        for job in [&done, &pending, &recurring] {
            repo.insert(job).await.unwrap();
        }

        assert_eq!(repo.purge_completed().await.unwrap(), 1);
        assert_eq!(repo.len().await, 2);
        assert!(repo.find_by_id(&done.id).await.unwrap().is_none());
    }
}
