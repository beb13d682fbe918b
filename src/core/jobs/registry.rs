use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::domain::entities::{JobData, JobRecord};
use crate::error::{AppError, Result};

/// What a handler sees of the record it is executing.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub name: String,
    pub data: JobData,
    /// 1 on the first run, incremented by each failure since the last retry.
    pub attempt: u32,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl JobContext {
    pub(crate) fn from_record(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            data: job.data.clone(),
            attempt: job.fail_count.saturating_add(1),
            scheduled_for: job.next_run_at,
        }
    }

    /// String field from `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|value| value.as_str())
    }
}

/// A named unit of work the scheduler can dispatch to.
///
/// Returning `Err` records the job as failed with the error text as its
/// `failReason`; a panic is treated the same way.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`JobHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerOptions {
    /// Max concurrent executions of this handler in this process. Falls back
    /// to the scheduler's default when unset.
    pub concurrency: Option<usize>,
}

impl HandlerOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: Some(concurrency),
        }
    }
}

struct Registration {
    handler: Arc<dyn JobHandler>,
    options: HandlerOptions,
}

/// Handlers registered by name. Built before the scheduler starts and frozen
/// once handed to it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, name: &str, options: HandlerOptions, handler: H) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::HandlerRegistration(
                "handler name must not be empty".to_string(),
            ));
        }
        if self.handlers.contains_key(name) {
            return Err(AppError::HandlerRegistration(format!(
                "handler '{}' is already registered",
                name
            )));
        }
        if options.concurrency == Some(0) {
            return Err(AppError::HandlerRegistration(format!(
                "handler '{}' concurrency must be greater than zero",
                name
            )));
        }

        self.handlers.insert(
            name.to_string(),
            Registration {
                handler: Arc::new(handler),
                options,
            },
        );
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, name: &str, options: HandlerOptions, f: F) -> Result<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, options, FnHandler(f))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn build(self, default_concurrency: usize) -> HashMap<String, HandlerEntry> {
        self.handlers
            .into_iter()
            .map(|(name, registration)| {
                let concurrency = registration
                    .options
                    .concurrency
                    .unwrap_or(default_concurrency)
                    .max(1);
                let entry = HandlerEntry {
                    handler: registration.handler,
                    concurrency,
                    slots: Arc::new(Semaphore::new(concurrency)),
                };
                (name, entry)
            })
            .collect()
    }
}

/// A frozen registration with its per-handler concurrency slots.
pub(crate) struct HandlerEntry {
    pub handler: Arc<dyn JobHandler>,
    pub concurrency: usize,
    pub slots: Arc<Semaphore>,
}
