#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskforge::{
    config::{Config, SchedulerConfig, StoreBackend},
    core::jobs::{HandlerRegistry, JobScheduler},
    domain::{JobData, JobRecord},
    infrastructure::InMemoryJobRepository,
};
use tokio::time::{sleep, Instant};

/// Scheduler settings tuned for tests: in-memory store, fast polling.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        store: StoreBackend::Memory,
        poll_interval: Duration::from_millis(50),
        ready_timeout: Duration::from_secs(5),
        ..SchedulerConfig::default()
    }
}

pub fn test_app_config(scheduler: SchedulerConfig) -> Config {
    Config {
        port: 0,
        client_origin: "http://localhost:3000".to_string(),
        scheduler,
        timer_presets: Vec::new(),
    }
}

pub fn data(value: Value) -> JobData {
    serde_json::from_value(value).expect("job data must be a JSON object")
}

/// Start a scheduler over a fresh in-memory store the test can inspect.
pub async fn start_scheduler(
    config: SchedulerConfig,
    registry: HandlerRegistry,
) -> (JobScheduler, Arc<InMemoryJobRepository>) {
    let store = Arc::new(InMemoryJobRepository::new());
    let scheduler = JobScheduler::new(config, registry);
    scheduler
        .initialize_with_store(store.clone())
        .await
        .expect("scheduler should start");
    (scheduler, store)
}

/// Poll `get_job` until `predicate` holds or `timeout` elapses; returns the
/// last snapshot either way.
pub async fn wait_for_job<P>(
    scheduler: &JobScheduler,
    id: &str,
    timeout: Duration,
    predicate: P,
) -> JobRecord
where
    P: Fn(&JobRecord) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let job = scheduler.get_job(id).await.expect("job should exist");
        if predicate(&job) || Instant::now() >= deadline {
            return job;
        }
        sleep(Duration::from_millis(20)).await;
    }
}
