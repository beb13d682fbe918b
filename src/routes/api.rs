use crate::{
    handlers::{health::*, jobs::*, timers::*},
    AppState,
};
use axum::{
    routing::{delete, get, post},
    Router,
};

/// Create the main API router with all endpoints
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/healthchecker", get(health_checker_handler))
        .route("/ready", get(readiness_handler))
        .nest("/jobs", job_routes())
        .nest("/timers", timer_routes())
}

/// Durable job scheduling routes
fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs_handler))
        .route("/now", post(schedule_now_handler))
        .route("/schedule", post(schedule_at_handler))
        .route("/recurring", post(schedule_recurring_handler))
        .route("/running", get(list_running_handler))
        .route("/failed", get(list_failed_handler))
        .route("/completed", delete(purge_completed_handler))
        .route("/:id", get(get_job_handler).delete(cancel_job_handler))
        .route("/:id/retry", post(retry_job_handler))
        .route("/:id/disable", post(disable_job_handler))
        .route("/:id/enable", post(enable_job_handler))
}

/// In-process timer routes
fn timer_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_timers_handler))
        .route("/:id", delete(remove_timer_handler))
        .route("/:id/stop", post(stop_timer_handler))
        .route("/:id/start", post(start_timer_handler))
}
