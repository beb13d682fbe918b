use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Which backing store the durable scheduler persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    MongoDb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(StoreBackend::MongoDb),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::ConfigError(format!(
                "SCHEDULER_STORE must be 'mongodb' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Tunables for the durable job scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub collection: String,
    pub store: StoreBackend,
    pub poll_interval: Duration,
    /// A claim older than this is treated as abandoned.
    pub lock_lifetime: Duration,
    pub ready_timeout: Duration,
    pub max_concurrency: usize,
    pub default_concurrency: usize,
    /// Upper bound on records fetched per poll cycle.
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_database: "taskforge".to_string(),
            collection: "agendaJobs".to_string(),
            store: StoreBackend::MongoDb,
            poll_interval: Duration::from_secs(5),
            lock_lifetime: Duration::from_secs(10 * 60),
            ready_timeout: Duration::from_secs(15),
            max_concurrency: 20,
            default_concurrency: 5,
            batch_size: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub client_origin: String,
    pub scheduler: SchedulerConfig,
    /// Timer presets armed at startup, e.g. `minute,hourly`.
    pub timer_presets: Vec<String>,
}

impl Config {
    pub fn init() -> Result<Config> {
        let defaults = SchedulerConfig::default();

        let store = match std::env::var("SCHEDULER_STORE") {
            Ok(value) => value.parse::<StoreBackend>()?,
            Err(_) => defaults.store,
        };

        let (mongodb_uri, mongodb_database) = if store == StoreBackend::MongoDb {
            (required("MONGODB_URI")?, required("MONGODB_DATABASE")?)
        } else {
            (
                std::env::var("MONGODB_URI").unwrap_or(defaults.mongodb_uri),
                std::env::var("MONGODB_DATABASE").unwrap_or(defaults.mongodb_database),
            )
        };

        let scheduler = SchedulerConfig {
            mongodb_uri,
            mongodb_database,
            collection: std::env::var("SCHEDULER_COLLECTION").unwrap_or(defaults.collection),
            store,
            poll_interval: Duration::from_secs(parse_or(
                "SCHEDULER_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            lock_lifetime: Duration::from_secs(parse_or(
                "SCHEDULER_LOCK_LIFETIME_SECS",
                defaults.lock_lifetime.as_secs(),
            )?),
            ready_timeout: Duration::from_secs(parse_or(
                "SCHEDULER_READY_TIMEOUT_SECS",
                defaults.ready_timeout.as_secs(),
            )?),
            max_concurrency: parse_or("SCHEDULER_MAX_CONCURRENCY", defaults.max_concurrency)?,
            default_concurrency: parse_or(
                "SCHEDULER_DEFAULT_CONCURRENCY",
                defaults.default_concurrency,
            )?,
            batch_size: parse_or("SCHEDULER_BATCH_SIZE", defaults.batch_size)?,
        };

        if scheduler.poll_interval.is_zero() {
            return Err(AppError::ConfigError(
                "SCHEDULER_POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if scheduler.max_concurrency == 0 || scheduler.default_concurrency == 0 {
            return Err(AppError::ConfigError(
                "scheduler concurrency limits must be greater than zero".to_string(),
            ));
        }

        let timer_presets = std::env::var("TIMER_PRESETS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        Ok(Config {
            port: parse_or("PORT", 8000u16)?,
            client_origin: std::env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_owned()),
            scheduler,
            timer_presets,
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::ConfigError(format!("{} must be set", key)))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::ConfigError(format!("{} must be a number, got '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
