use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Scheduler not initialized")]
    NotInitialized,

    #[error("Scheduler initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Scheduler did not become ready within {0} seconds")]
    InitializationTimeout(u64),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job is locked by a running execution: {0}")]
    JobLocked(String),

    #[error("Timer task not found: {0}")]
    TimerTaskNotFound(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Handler registration error: {0}")]
    HandlerRegistration(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InitializationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InitializationTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::JobLocked(_) => StatusCode::CONFLICT,
            AppError::TimerTaskNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCronExpression { .. } => StatusCode::BAD_REQUEST,
            AppError::HandlerRegistration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
