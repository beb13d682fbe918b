mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use serde_json::json;
use taskforge::{
    config::SchedulerConfig,
    core::jobs::{register_builtin_handlers, HandlerOptions, HandlerRegistry, JobScheduler, RunAt},
    domain::{JobData, JobStatus},
    infrastructure::InMemoryJobRepository,
    AppError,
};

use common::{data, start_scheduler, test_config, wait_for_job};

const SETTLE: Duration = Duration::from_secs(3);

fn noop_registry(name: &str) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn(name, HandlerOptions::default(), |_ctx| async { Ok(()) })
        .unwrap();
    registry
}

fn is_settled(status: JobStatus) -> bool {
    matches!(status, JobStatus::Completed | JobStatus::Error)
}

#[tokio::test]
async fn test_send_email_scenario_settles_within_a_poll() {
    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry).unwrap();
    let (scheduler, _store) = start_scheduler(test_config(), registry).await;

    let job = scheduler
        .schedule_now("send-email", data(json!({ "to": "a@b.com" })))
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Pending);

    let job = wait_for_job(&scheduler, &job.id, SETTLE, |j| is_settled(j.status())).await;
    assert!(is_settled(job.status()), "status was {}", job.status());
    assert!(job.locked_at.is_none());
    let (started, finished) = (job.last_run_at.unwrap(), job.last_finished_at.unwrap());
    assert!(started <= finished);
    assert!(job.next_run_at.is_none());

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_failing_handler_records_one_failure_per_dispatch() {
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("flaky", HandlerOptions::default(), |_ctx| async {
            bail!("upstream unavailable")
        })
        .unwrap();
    let (scheduler, _store) = start_scheduler(test_config(), registry).await;

    let job = scheduler.schedule_now("flaky", JobData::new()).await.unwrap();
    let job = wait_for_job(&scheduler, &job.id, SETTLE, |j| j.status() == JobStatus::Error).await;

    assert_eq!(job.status(), JobStatus::Error);
    assert_eq!(job.fail_count, 1);
    assert_eq!(job.fail_reason.as_deref(), Some("upstream unavailable"));
    assert!(job.failed_at.is_some());
    assert!(job.locked_at.is_none());
    assert!(job.next_run_at.is_none());

    // No automatic reschedule.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(scheduler.get_job(&job.id).await.unwrap().fail_count, 1);

    let failed = scheduler.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, job.id);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_retry_dispatches_without_waiting_for_next_poll() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("fails-once", HandlerOptions::default(), move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    bail!("first attempt fails");
                }
                Ok(())
            }
        })
        .unwrap();

    // Long enough that only an explicit wake can explain a prompt dispatch.
    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(60),
        ..test_config()
    };
    let (scheduler, _store) = start_scheduler(config, registry).await;

    let job = scheduler.schedule_now("fails-once", JobData::new()).await.unwrap();
    let failed = wait_for_job(&scheduler, &job.id, SETTLE, |j| j.status() == JobStatus::Error).await;
    assert_eq!(failed.fail_count, 1);

    let retried = scheduler.retry_job(&job.id).await.unwrap();
    assert_eq!(retried.status(), JobStatus::Pending);
    assert_eq!(retried.fail_count, 0);
    assert!(retried.failed_at.is_none());
    assert!(retried.fail_reason.is_none());

    let done = wait_for_job(&scheduler, &job.id, SETTLE, |j| {
        j.status() == JobStatus::Completed
    })
    .await;
    assert_eq!(done.status(), JobStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_retry_unknown_job_is_not_found() {
    let (scheduler, _store) = start_scheduler(test_config(), noop_registry("noop")).await;
    assert!(matches!(
        scheduler.retry_job("missing").await,
        Err(AppError::JobNotFound(_))
    ));
    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_cancel_removes_record() {
    let (scheduler, store) = start_scheduler(test_config(), noop_registry("noop")).await;

    let job = scheduler
        .schedule_at("noop", "in 1 hour", JobData::new())
        .await
        .unwrap();
    scheduler.cancel_job(&job.id).await.unwrap();

    assert!(matches!(
        scheduler.get_job(&job.id).await,
        Err(AppError::JobNotFound(_))
    ));
    assert!(matches!(
        scheduler.cancel_job(&job.id).await,
        Err(AppError::JobNotFound(_))
    ));
    assert!(store.is_empty().await);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_schedule_at_offsets() {
    let (scheduler, _store) = start_scheduler(test_config(), noop_registry("noop")).await;

    let before = Utc::now();
    let in_thirty = scheduler
        .schedule_at("noop", RunAt::Seconds(30), JobData::new())
        .await
        .unwrap();
    let delta = in_thirty.next_run_at.unwrap() - before;
    assert!((delta.num_milliseconds() - 30_000).abs() < 1_000, "{:?}", delta);
    assert_eq!(in_thirty.status(), JobStatus::Pending);

    let in_five_minutes = scheduler
        .schedule_at("noop", "in 5 minutes", JobData::new())
        .await
        .unwrap();
    let delta = in_five_minutes.next_run_at.unwrap() - before;
    assert!((delta.num_seconds() - 300).abs() <= 1, "{:?}", delta);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_recurring_job_runs_immediately_and_rearms() {
    let (scheduler, _store) = start_scheduler(test_config(), noop_registry("digest")).await;

    let job = scheduler
        .schedule_recurring("digest", "1 hour", JobData::new())
        .await
        .unwrap();
    let first_due = job.next_run_at.unwrap();
    assert!(first_due <= Utc::now());

    let job = wait_for_job(&scheduler, &job.id, SETTLE, |j| j.last_finished_at.is_some()).await;
    assert_eq!(job.status(), JobStatus::Pending);
    assert_eq!(job.repeat_interval.as_deref(), Some("1 hour"));
    assert_eq!(job.next_run_at, Some(first_due + chrono::Duration::hours(1)));
    assert!(job.locked_at.is_none());

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_per_handler_concurrency_limit() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (active_in, peak_in) = (Arc::clone(&active), Arc::clone(&peak));

    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("serial", HandlerOptions::with_concurrency(1), move |_ctx| {
            let active = Arc::clone(&active_in);
            let peak = Arc::clone(&peak_in);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(60)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();
    let (scheduler, _store) = start_scheduler(test_config(), registry).await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(scheduler.schedule_now("serial", JobData::new()).await.unwrap().id);
    }
    for id in &ids {
        let job = wait_for_job(&scheduler, id, Duration::from_secs(5), |j| {
            j.status() == JobStatus::Completed
        })
        .await;
        assert_eq!(job.status(), JobStatus::Completed);
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_saturated_handler_backlog_does_not_block_other_handlers() {
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("slow", HandlerOptions::with_concurrency(1), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        })
        .unwrap();
    registry
        .register_fn("fast", HandlerOptions::default(), |_ctx| async { Ok(()) })
        .unwrap();
    let config = SchedulerConfig {
        batch_size: 2,
        ..test_config()
    };
    let (scheduler, _store) = start_scheduler(config, registry).await;

    for _ in 0..3 {
        scheduler.schedule_now("slow", JobData::new()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    let fast = scheduler.schedule_now("fast", JobData::new()).await.unwrap();

    let fast = wait_for_job(&scheduler, &fast.id, Duration::from_secs(1), |j| {
        j.status() == JobStatus::Completed
    })
    .await;
    assert_eq!(fast.status(), JobStatus::Completed);

    scheduler.shutdown(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_out_of_range_recurring_interval_is_rejected() {
    let (scheduler, _store) = start_scheduler(test_config(), noop_registry("noop")).await;

    let err = scheduler
        .schedule_recurring("noop", "1000000000 days", JobData::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidSchedule(_)));
    assert!(scheduler.list_by_name("noop").await.unwrap().is_empty());

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unregistered_handler_job_stays_pending() {
    let (scheduler, _store) = start_scheduler(test_config(), noop_registry("noop")).await;

    let job = scheduler.schedule_now("nobody-home", JobData::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let job = scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
    assert!(job.last_run_at.is_none());
    assert_eq!(scheduler.list_by_name("nobody-home").await.unwrap().len(), 1);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_disabled_job_is_skipped_until_enabled() {
    let (scheduler, _store) = start_scheduler(test_config(), noop_registry("noop")).await;

    let job = scheduler
        .schedule_at("noop", RunAt::Seconds(1), JobData::new())
        .await
        .unwrap();
    assert!(scheduler.disable_job(&job.id).await.unwrap().disabled);

    tokio::time::sleep(Duration::from_millis(1_300)).await;
    let idle = scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(idle.status(), JobStatus::Pending);
    assert!(idle.last_run_at.is_none());

    scheduler.enable_job(&job.id).await.unwrap();
    let job = wait_for_job(&scheduler, &job.id, SETTLE, |j| {
        j.status() == JobStatus::Completed
    })
    .await;
    assert_eq!(job.status(), JobStatus::Completed);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_two_schedulers_on_one_store_run_each_job_once() {
    let runs: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

    let registry_for = |runs: Arc<Mutex<HashMap<String, usize>>>| {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("shared", HandlerOptions::default(), move |ctx| {
                let runs = Arc::clone(&runs);
                async move {
                    *runs.lock().unwrap().entry(ctx.job_id).or_default() += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }
            })
            .unwrap();
        registry
    };

    let store = Arc::new(InMemoryJobRepository::new());
    let first = JobScheduler::new(test_config(), registry_for(Arc::clone(&runs)));
    let second = JobScheduler::new(test_config(), registry_for(Arc::clone(&runs)));
    first.initialize_with_store(store.clone()).await.unwrap();
    second.initialize_with_store(store.clone()).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(first.schedule_now("shared", JobData::new()).await.unwrap().id);
    }
    for id in &ids {
        let job = wait_for_job(&second, id, Duration::from_secs(5), |j| {
            j.status() == JobStatus::Completed
        })
        .await;
        assert_eq!(job.status(), JobStatus::Completed);
    }

    let runs = runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 20);
    assert!(runs.values().all(|count| *count == 1), "{:?}", runs);

    first.shutdown(Duration::from_secs(1)).await;
    second.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_shutdown_waits_for_running_handler() {
    let finished = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&finished);

    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("slow", HandlerOptions::default(), move |_ctx| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();
    let (scheduler, _store) = start_scheduler(test_config(), registry).await;

    let job = scheduler.schedule_now("slow", JobData::new()).await.unwrap();
    wait_for_job(&scheduler, &job.id, SETTLE, |j| j.status() == JobStatus::InProgress).await;
    assert_eq!(scheduler.list_running().await.unwrap().len(), 1);

    scheduler.shutdown(Duration::from_secs(2)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_ready());
}

#[tokio::test]
async fn test_purge_removes_completed_one_shots() {
    let (scheduler, store) = start_scheduler(test_config(), noop_registry("noop")).await;

    let done = scheduler.schedule_now("noop", JobData::new()).await.unwrap();
    let later = scheduler
        .schedule_at("noop", "in 1 day", JobData::new())
        .await
        .unwrap();
    wait_for_job(&scheduler, &done.id, SETTLE, |j| j.status() == JobStatus::Completed).await;

    assert_eq!(scheduler.purge_completed().await.unwrap(), 1);
    assert_eq!(store.len().await, 1);
    assert!(scheduler.get_job(&later.id).await.is_ok());

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_initialize_twice_is_a_no_op() {
    let scheduler = JobScheduler::new(test_config(), noop_registry("noop"));
    scheduler.initialize().await.unwrap();
    scheduler.initialize().await.unwrap();
    assert!(scheduler.is_ready());
    assert_eq!(scheduler.registered_handlers(), vec!["noop".to_string()]);
    scheduler.shutdown(Duration::from_secs(1)).await;
}
