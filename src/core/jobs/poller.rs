use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::JobContext;
use super::schedule::{next_recurring_run, now_millis, parse_interval};
use super::scheduler::SchedulerInner;
use crate::domain::entities::{lock_cutoff, JobOutcome, JobRecord};
use crate::domain::repositories::JobStore;
use crate::error::{AppError, Result};

/// The background claim-and-dispatch loop.
#[derive(Clone)]
pub(crate) struct Poller {
    inner: Arc<SchedulerInner>,
    store: Arc<dyn JobStore>,
    shutdown: CancellationToken,
}

impl Poller {
    pub(crate) fn new(
        inner: Arc<SchedulerInner>,
        store: Arc<dyn JobStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner,
            store,
            shutdown,
        }
    }

    /// Prepare the store, report readiness, then poll until cancelled.
    pub(crate) async fn run(self, ready: oneshot::Sender<Result<()>>) {
        if let Err(e) = self.store.prepare().await {
            let _ = ready.send(Err(e));
            return;
        }
        if ready.send(Ok(())).is_err() {
            // Initializer gave up waiting.
            return;
        }

        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.inner.wake.notified() => debug!("Poll loop woken early"),
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "❌ Poll cycle failed");
            }
        }

        info!("🛑 Job poll loop stopped");
    }

    /// Claim and dispatch as many due jobs as the concurrency slots allow.
    /// Returns how many were dispatched.
    ///
    /// Each handler name is scanned separately and only for as many records
    /// as it has free slots, so a saturated handler's backlog never hides
    /// another handler's due jobs.
    pub(crate) async fn poll_once(&self) -> Result<usize> {
        let now = now_millis();
        let cutoff = lock_cutoff(now, self.inner.config.lock_lifetime);
        let mut dispatched = 0;

        for name in &self.inner.handler_names {
            let Some(entry) = self.inner.handlers.get(name) else {
                continue;
            };

            let global_free = self.inner.global_slots.available_permits();
            if global_free == 0 {
                debug!("Global concurrency limit reached, deferring remaining jobs");
                break;
            }
            let free = entry.slots.available_permits().min(global_free);
            if free == 0 {
                debug!(
                    name = %name,
                    concurrency = entry.concurrency,
                    "Handler at concurrency limit"
                );
                continue;
            }
            let limit = i64::try_from(free)
                .unwrap_or(i64::MAX)
                .min(self.inner.config.batch_size);

            let candidates = self
                .store
                .find_due(std::slice::from_ref(name), now, cutoff, limit)
                .await?;

            for candidate in candidates {
                let Ok(global) = Arc::clone(&self.inner.global_slots).try_acquire_owned() else {
                    debug!("Global concurrency limit reached, deferring remaining jobs");
                    return Ok(dispatched);
                };
                let Ok(local) = Arc::clone(&entry.slots).try_acquire_owned() else {
                    break;
                };

                match self.store.claim(&candidate.id, now, cutoff).await? {
                    Some(job) => {
                        debug!(job_id = %job.id, name = %job.name, "Job claimed");
                        let poller = self.clone();
                        tokio::spawn(async move {
                            let _permits = (global, local);
                            poller.execute(job).await;
                        });
                        dispatched += 1;
                    }
                    None => debug!(job_id = %candidate.id, "Lost claim race, skipping"),
                }
            }
        }

        Ok(dispatched)
    }

    /// Run the handler for a claimed job and record the outcome.
    ///
    /// Returns the outcome when it was written, `None` when the record was
    /// cancelled or re-claimed while the handler ran.
    pub(crate) async fn execute(&self, job: JobRecord) -> Option<JobOutcome> {
        let Some(claimed_at) = job.locked_at else {
            warn!(job_id = %job.id, "Refusing to execute a job that was not claimed");
            return None;
        };

        info!(job_id = %job.id, name = %job.name, "🚀 Running job");
        let started = Instant::now();

        let result = match self.inner.handlers.get(&job.name) {
            Some(entry) => {
                let handler = Arc::clone(&entry.handler);
                let ctx = JobContext::from_record(&job);
                match AssertUnwindSafe(handler.run(ctx)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(anyhow!("handler panicked: {}", panic_message(&*panic))),
                }
            }
            None => Err(anyhow!("no handler registered for '{}'", job.name)),
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let finished_at = now_millis();
        let outcome = match result {
            Ok(()) => success_outcome(&job, finished_at, duration_ms),
            Err(err) => JobOutcome::Failed {
                finished_at,
                reason: format!("{:#}", err),
                duration_ms,
            },
        };

        match self.store.finish(&job.id, claimed_at, &outcome).await {
            Ok(true) => {
                match &outcome {
                    JobOutcome::Failed { reason, .. } => warn!(
                        job_id = %job.id,
                        name = %job.name,
                        duration_ms,
                        reason = %reason,
                        "❌ Job failed"
                    ),
                    _ => info!(
                        job_id = %job.id,
                        name = %job.name,
                        duration_ms,
                        next_run_at = ?outcome.next_run_at(),
                        "✅ Job finished"
                    ),
                }
                Some(outcome)
            }
            Ok(false) => {
                warn!(
                    job_id = %job.id,
                    name = %job.name,
                    "Job was cancelled or re-claimed while running, result discarded"
                );
                None
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job outcome");
                None
            }
        }
    }
}

fn success_outcome(
    job: &JobRecord,
    finished_at: chrono::DateTime<chrono::Utc>,
    duration_ms: u64,
) -> JobOutcome {
    let Some(interval) = job.repeat_interval.as_deref() else {
        return JobOutcome::Completed {
            finished_at,
            duration_ms,
        };
    };

    let previous = job.next_run_at.unwrap_or(finished_at);
    let next_run_at = parse_interval(interval).and_then(|every| {
        next_recurring_run(previous, every, finished_at).ok_or_else(|| {
            AppError::InvalidSchedule(format!(
                "next run for interval '{}' is out of range",
                interval
            ))
        })
    });

    match next_run_at {
        Ok(next_run_at) => JobOutcome::Rearmed {
            finished_at,
            next_run_at,
            duration_ms,
        },
        Err(e) => JobOutcome::Failed {
            finished_at,
            reason: e.to_string(),
            duration_ms,
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
