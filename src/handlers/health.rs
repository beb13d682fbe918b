use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_checker_handler() -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": "Taskforge scheduler is running! 🚀",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// 200 once the job scheduler is polling, 503 before that.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let ready = state.scheduler.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "initializing" },
            "handlers": state.scheduler.registered_handlers(),
            "collection": state.env.scheduler.collection,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}
