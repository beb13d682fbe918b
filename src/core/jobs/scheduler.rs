use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::poller::Poller;
use super::registry::{HandlerEntry, HandlerRegistry};
use super::schedule::{now_millis, parse_interval, RunAt};
use crate::config::{SchedulerConfig, StoreBackend};
use crate::domain::entities::{lock_cutoff, JobData, JobFilter, JobRecord, JobStatus};
use crate::domain::repositories::JobStore;
use crate::error::{AppError, Result};
use crate::infrastructure::{DatabaseManager, InMemoryJobRepository, MongoJobRepository};

/// State shared between the public handle and the poll loop.
pub(crate) struct SchedulerInner {
    pub config: SchedulerConfig,
    pub handlers: HashMap<String, HandlerEntry>,
    /// Sorted handler names; the poll scan only considers these.
    pub handler_names: Vec<String>,
    pub global_slots: Arc<Semaphore>,
    pub wake: Notify,
    ready: AtomicBool,
    init_lock: Mutex<()>,
    runtime: RwLock<Option<Runtime>>,
}

impl SchedulerInner {
    pub(crate) fn new(config: SchedulerConfig, registry: HandlerRegistry) -> Self {
        let handler_names = registry.names();
        let handlers = registry.build(config.default_concurrency);
        let global_slots = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        Self {
            config,
            handlers,
            handler_names,
            global_slots,
            wake: Notify::new(),
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            runtime: RwLock::new(None),
        }
    }
}

/// Live resources that exist only between `initialize` and `shutdown`.
struct Runtime {
    store: Arc<dyn JobStore>,
    shutdown: CancellationToken,
    poll_task: JoinHandle<()>,
}

/// Durable, lock-based job scheduler.
///
/// Jobs are persisted through a [`JobStore`]; a background poll loop claims
/// due records one at a time with an atomic conditional update and hands them
/// to the handler registered under the record's name. Cloning is cheap and
/// every clone drives the same scheduler.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, registry: HandlerRegistry) -> Self {
        Self {
            inner: Arc::new(SchedulerInner::new(config, registry)),
        }
    }

    /// Connect to the configured backing store and start polling.
    ///
    /// Blocks until the poll loop reports ready or `ready_timeout` elapses.
    /// Calling this on a running scheduler logs a warning and does nothing.
    pub async fn initialize(&self) -> Result<()> {
        self.initialize_from(self.connect_store()).await
    }

    async fn initialize_from<F>(&self, connect: F) -> Result<()>
    where
        F: Future<Output = Result<Arc<dyn JobStore>>>,
    {
        let _guard = self.inner.init_lock.lock().await;
        if self.is_ready() {
            warn!("Job scheduler already initialized, ignoring");
            return Ok(());
        }

        info!("🔄 Initializing job scheduler...");
        // Connecting and the readiness handshake share one deadline.
        let deadline = Instant::now() + self.inner.config.ready_timeout;
        let store = match tokio::time::timeout_at(deadline, connect).await {
            Ok(store) => store?,
            Err(_) => {
                error!("❌ Timed out connecting the job store");
                return Err(self.timeout_error());
            }
        };

        self.start(store, deadline).await
    }

    /// Start polling against an already constructed store.
    pub async fn initialize_with_store(&self, store: Arc<dyn JobStore>) -> Result<()> {
        let _guard = self.inner.init_lock.lock().await;
        if self.is_ready() {
            warn!("Job scheduler already initialized, ignoring");
            return Ok(());
        }
        self.start(store, Instant::now() + self.inner.config.ready_timeout)
            .await
    }

    async fn connect_store(&self) -> Result<Arc<dyn JobStore>> {
        let config = &self.inner.config;
        match config.store {
            StoreBackend::MongoDb => {
                let manager = DatabaseManager::new(&config.mongodb_uri, &config.mongodb_database)
                    .await
                    .map_err(|e| AppError::InitializationFailed(e.to_string()))?;
                Ok(Arc::new(MongoJobRepository::new(
                    manager.get_database(),
                    &config.collection,
                )))
            }
            StoreBackend::Memory => {
                warn!("⚠️ Using the in-memory job store; jobs will not survive a restart");
                Ok(Arc::new(InMemoryJobRepository::new()))
            }
        }
    }

    fn timeout_error(&self) -> AppError {
        AppError::InitializationTimeout(self.inner.config.ready_timeout.as_secs())
    }

    async fn start(&self, store: Arc<dyn JobStore>, deadline: Instant) -> Result<()> {
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let poller = Poller::new(Arc::clone(&self.inner), Arc::clone(&store), shutdown.clone());
        let poll_task = tokio::spawn(poller.run(ready_tx));

        let started = match tokio::time::timeout_at(deadline, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(AppError::InitializationFailed(e.to_string())),
            Ok(Err(_)) => Err(AppError::InitializationFailed(
                "poll loop exited before signalling readiness".to_string(),
            )),
            Err(_) => Err(self.timeout_error()),
        };

        if let Err(e) = started {
            shutdown.cancel();
            poll_task.abort();
            error!(error = %e, "❌ Job scheduler failed to start");
            return Err(e);
        }

        *self.inner.runtime.write().await = Some(Runtime {
            store,
            shutdown,
            poll_task,
        });
        self.inner.ready.store(true, Ordering::SeqCst);

        info!(
            handlers = ?self.inner.handler_names,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "✅ Job scheduler ready"
        );
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn registered_handlers(&self) -> Vec<String> {
        self.inner.handler_names.clone()
    }

    async fn store(&self) -> Result<Arc<dyn JobStore>> {
        self.inner
            .runtime
            .read()
            .await
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.store))
            .ok_or(AppError::NotInitialized)
    }

    fn cutoff(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        lock_cutoff(now, self.inner.config.lock_lifetime)
    }

    async fn create(
        &self,
        store: Arc<dyn JobStore>,
        name: &str,
        data: JobData,
        next_run_at: chrono::DateTime<chrono::Utc>,
        repeat_interval: Option<String>,
    ) -> Result<JobRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError(
                "job name must not be empty".to_string(),
            ));
        }
        if !self.inner.handlers.contains_key(name) {
            warn!(name = %name, "No handler registered for job; it will stay pending until one is");
        }

        let job = JobRecord::new(name, data, next_run_at, repeat_interval);
        store.insert(&job).await?;

        info!(
            job_id = %job.id,
            name = %job.name,
            next_run_at = %next_run_at,
            repeat_interval = ?job.repeat_interval,
            "📅 Job scheduled"
        );

        if next_run_at <= now_millis() {
            self.inner.wake.notify_one();
        }
        Ok(job)
    }

    pub async fn schedule_now(&self, name: &str, data: JobData) -> Result<JobRecord> {
        let store = self.store().await?;
        self.create(store, name, data, now_millis(), None).await
    }

    pub async fn schedule_at(
        &self,
        name: &str,
        when: impl Into<RunAt>,
        data: JobData,
    ) -> Result<JobRecord> {
        let store = self.store().await?;
        let next_run_at = when.into().resolve(now_millis())?;
        self.create(store, name, data, next_run_at, None).await
    }

    /// Schedule `name` every `interval`, starting immediately.
    pub async fn schedule_recurring(
        &self,
        name: &str,
        interval: &str,
        data: JobData,
    ) -> Result<JobRecord> {
        let store = self.store().await?;
        let every = parse_interval(interval)?;
        let now = now_millis();
        if now.checked_add_signed(every).is_none() {
            return Err(AppError::InvalidSchedule(format!(
                "interval '{}' is out of range",
                interval
            )));
        }
        self.create(
            store,
            name,
            data,
            now,
            Some(interval.trim().to_string()),
        )
        .await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<JobRecord>> {
        self.store().await?.find(&filter).await
    }

    pub async fn get_job(&self, id: &str) -> Result<JobRecord> {
        self.store()
            .await?
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))
    }

    /// Remove the record whatever its state. A handler already running for it
    /// finishes, but its completion is discarded.
    pub async fn cancel_job(&self, id: &str) -> Result<()> {
        if !self.store().await?.delete(id).await? {
            return Err(AppError::JobNotFound(id.to_string()));
        }
        info!(job_id = %id, "🗑️ Job cancelled");
        Ok(())
    }

    /// Clear failure bookkeeping and dispatch on the next poll, which is
    /// triggered right away.
    pub async fn retry_job(&self, id: &str) -> Result<JobRecord> {
        let store = self.store().await?;
        let now = now_millis();

        match store.reset_for_retry(id, now, self.cutoff(now)).await? {
            Some(job) => {
                info!(job_id = %id, name = %job.name, "🔁 Job queued for retry");
                self.inner.wake.notify_one();
                Ok(job)
            }
            None => match store.find_by_id(id).await? {
                Some(_) => Err(AppError::JobLocked(id.to_string())),
                None => Err(AppError::JobNotFound(id.to_string())),
            },
        }
    }

    pub async fn list_running(&self) -> Result<Vec<JobRecord>> {
        self.list_jobs(JobFilter::by_status(JobStatus::InProgress))
            .await
    }

    pub async fn list_failed(&self) -> Result<Vec<JobRecord>> {
        self.list_jobs(JobFilter::by_status(JobStatus::Error)).await
    }

    pub async fn list_by_name(&self, name: &str) -> Result<Vec<JobRecord>> {
        self.list_jobs(JobFilter::by_name(name)).await
    }

    pub async fn disable_job(&self, id: &str) -> Result<JobRecord> {
        self.set_disabled(id, true).await
    }

    pub async fn enable_job(&self, id: &str) -> Result<JobRecord> {
        let job = self.set_disabled(id, false).await?;
        if job.is_eligible(now_millis(), self.inner.config.lock_lifetime) {
            self.inner.wake.notify_one();
        }
        Ok(job)
    }

    async fn set_disabled(&self, id: &str, disabled: bool) -> Result<JobRecord> {
        let job = self
            .store()
            .await?
            .set_disabled(id, disabled)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;
        info!(job_id = %id, disabled, "Job updated");
        Ok(job)
    }

    /// Delete inert one-shot jobs that completed successfully.
    pub async fn purge_completed(&self) -> Result<u64> {
        let removed = self.store().await?.purge_completed().await?;
        info!(removed, "🧹 Purged completed jobs");
        Ok(removed)
    }

    /// Stop polling and wait up to `grace` for running handlers to finish.
    ///
    /// The scheduler is non-ready afterwards and may be initialized again.
    pub async fn shutdown(&self, grace: Duration) {
        let _guard = self.inner.init_lock.lock().await;
        let Some(runtime) = self.inner.runtime.write().await.take() else {
            warn!("Job scheduler is not running, nothing to shut down");
            return;
        };

        info!("🛑 Shutting down job scheduler...");
        self.inner.ready.store(false, Ordering::SeqCst);
        runtime.shutdown.cancel();
        if let Err(e) = runtime.poll_task.await {
            warn!(error = %e, "Poll loop ended abnormally");
        }

        let permits = u32::try_from(self.inner.config.max_concurrency.max(1)).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.inner.global_slots.acquire_many(permits)).await {
            Ok(_) => info!("✅ Job scheduler stopped"),
            Err(_) => warn!(
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed with handlers still running"
            ),
        }
    }
}
