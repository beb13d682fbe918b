use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cron_expr::CronExpression;
use super::presets::TimerPreset;
use crate::error::{AppError, Result};

/// Zero-argument async action fired by a timer.
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub fn timer_callback<F, Fut>(f: F) -> TimerCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Snapshot returned by [`TimerScheduler::tasks_status`].
///
/// `last_execution` and `execution_count` are process-local and reset on
/// restart; they are informational only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub running: bool,
    pub expression: String,
    pub description: String,
    pub last_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
}

#[derive(Debug, Clone, Default)]
struct ExecutionStats {
    last_execution: Option<DateTime<Utc>>,
    execution_count: u64,
}

struct TimerTask {
    expression: CronExpression,
    description: String,
    callback: TimerCallback,
    /// `Some` while armed.
    cancel: Option<CancellationToken>,
}

type StatsMap = Arc<Mutex<HashMap<String, ExecutionStats>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory cron timers. Nothing is persisted; every registration is lost on
/// restart.
#[derive(Default)]
pub struct TimerScheduler {
    tasks: Mutex<HashMap<String, TimerTask>>,
    stats: StatsMap,
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `expression` and arm it under `id`.
    ///
    /// Returns `Ok(false)` when `id` is already armed; the existing timer is
    /// left untouched. A stopped task with the same id is replaced.
    pub fn register_task(
        &self,
        id: &str,
        expression: &str,
        description: &str,
        callback: TimerCallback,
    ) -> Result<bool> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::ValidationError(
                "timer task id must not be empty".to_string(),
            ));
        }
        let expression = CronExpression::parse(expression)?;

        let mut tasks = lock(&self.tasks);
        if tasks.get(id).is_some_and(|task| task.cancel.is_some()) {
            warn!(task = %id, "Timer task is already running, ignoring");
            return Ok(false);
        }

        let mut task = TimerTask {
            expression,
            description: description.to_string(),
            callback,
            cancel: None,
        };
        task.cancel = Some(self.arm(id, &task)?);

        info!(
            task = %id,
            expression = %task.expression.as_str(),
            "⏰ Timer task started"
        );
        tasks.insert(id.to_string(), task);
        Ok(true)
    }

    pub fn start_custom_task(
        &self,
        expression: &str,
        name: &str,
        callback: TimerCallback,
    ) -> Result<bool> {
        self.register_task(name, expression, &format!("Custom task: {}", name), callback)
    }

    /// Arm a preset with a callback that only logs a heartbeat.
    pub fn start_preset(&self, preset: TimerPreset) -> Result<bool> {
        let id = preset.id();
        self.start_preset_with(
            preset,
            timer_callback(move || async move {
                info!(task = %id, "⏰ Scheduled task fired");
            }),
        )
    }

    pub fn start_preset_with(&self, preset: TimerPreset, callback: TimerCallback) -> Result<bool> {
        self.register_task(
            preset.id(),
            preset.expression(),
            preset.description(),
            callback,
        )
    }

    /// Disarm `id` but keep it registered so it can be restarted.
    pub fn stop_task(&self, id: &str) -> bool {
        let mut tasks = lock(&self.tasks);
        match tasks.get_mut(id).and_then(|task| task.cancel.take()) {
            Some(cancel) => {
                cancel.cancel();
                info!(task = %id, "Timer task stopped");
                true
            }
            None => false,
        }
    }

    /// Re-arm a stopped task.
    pub fn start_task(&self, id: &str) -> bool {
        let mut tasks = lock(&self.tasks);
        let Some(task) = tasks.get_mut(id) else {
            return false;
        };
        if task.cancel.is_some() {
            return false;
        }

        match self.arm(id, task) {
            Ok(cancel) => {
                task.cancel = Some(cancel);
                info!(task = %id, "Timer task restarted");
                true
            }
            Err(e) => {
                warn!(task = %id, error = %e, "Failed to restart timer task");
                false
            }
        }
    }

    /// Disarm and forget `id`. Custom task counters go with it.
    pub fn remove_task(&self, id: &str) -> bool {
        let Some(task) = lock(&self.tasks).remove(id) else {
            return false;
        };
        if let Some(cancel) = task.cancel {
            cancel.cancel();
        }
        if TimerPreset::from_id(id).is_none() {
            lock(&self.stats).remove(id);
        }
        info!(task = %id, "Timer task removed");
        true
    }

    /// Disarm and forget every task.
    pub fn stop_all_tasks(&self) {
        let drained: Vec<(String, TimerTask)> = lock(&self.tasks).drain().collect();
        if drained.is_empty() {
            return;
        }

        let mut stats = lock(&self.stats);
        for (id, task) in &drained {
            if let Some(cancel) = &task.cancel {
                cancel.cancel();
            }
            if TimerPreset::from_id(id).is_none() {
                stats.remove(id);
            }
        }
        info!(count = drained.len(), "🛑 All timer tasks stopped");
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.tasks).contains_key(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.tasks)
            .get(id)
            .is_some_and(|task| task.cancel.is_some())
    }

    /// Every preset, armed or not, plus every registered custom task.
    pub fn tasks_status(&self) -> BTreeMap<String, TaskStatus> {
        let tasks = lock(&self.tasks);
        let stats = lock(&self.stats);
        let counters = |id: &str| stats.get(id).cloned().unwrap_or_default();

        let mut status: BTreeMap<String, TaskStatus> = TimerPreset::ALL
            .into_iter()
            .map(|preset| {
                let counters = counters(preset.id());
                let entry = TaskStatus {
                    running: false,
                    expression: preset.expression().to_string(),
                    description: preset.description().to_string(),
                    last_execution: counters.last_execution,
                    execution_count: counters.execution_count,
                };
                (preset.id().to_string(), entry)
            })
            .collect();

        for (id, task) in tasks.iter() {
            let counters = counters(id.as_str());
            status.insert(
                id.clone(),
                TaskStatus {
                    running: task.cancel.is_some(),
                    expression: task.expression.as_str().to_string(),
                    description: task.description.clone(),
                    last_execution: counters.last_execution,
                    execution_count: counters.execution_count,
                },
            );
        }

        status
    }

    fn arm(&self, id: &str, task: &TimerTask) -> Result<CancellationToken> {
        let handle = Handle::try_current().map_err(|_| {
            AppError::InternalServerError("timer tasks need a running tokio runtime".to_string())
        })?;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let expression = task.expression.clone();
        let callback = Arc::clone(&task.callback);
        let stats = Arc::clone(&self.stats);
        let id = id.to_string();

        handle.spawn(async move {
            let mut last_fired: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                // Never fire the same instant twice if the wall clock lags the timer.
                let reference = last_fired.map_or(now, |fired| fired.max(now));
                let Some(next) = expression.next_after(&reference) else {
                    warn!(task = %id, "Cron expression has no further occurrences");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                last_fired = Some(next);
                record_execution(&stats, &id);
                debug!(task = %id, "Timer fired");
                tokio::spawn((callback.as_ref())());
            }
        });

        Ok(token)
    }
}

fn record_execution(stats: &StatsMap, id: &str) {
    let mut stats = lock(stats);
    let entry = stats.entry(id.to_string()).or_default();
    entry.last_execution = Some(Utc::now());
    entry.execution_count += 1;
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.stop_all_tasks();
    }
}
