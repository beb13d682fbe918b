use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, Result},
    AppState,
};

pub async fn list_timers_handler(State(state): State<AppState>) -> Json<Value> {
    let tasks = state.timers.tasks_status();
    Json(json!({
        "status": "success",
        "data": { "count": tasks.len(), "tasks": tasks }
    }))
}

fn ensure_registered(state: &AppState, id: &str) -> Result<()> {
    if state.timers.contains(id) {
        Ok(())
    } else {
        Err(AppError::TimerTaskNotFound(id.to_string()))
    }
}

pub async fn stop_timer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    ensure_registered(&state, &id)?;
    let stopped = state.timers.stop_task(&id);
    Ok(Json(json!({
        "status": "success",
        "data": { "id": id, "running": false, "changed": stopped }
    })))
}

pub async fn start_timer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    ensure_registered(&state, &id)?;
    let started = state.timers.start_task(&id);
    let running = state.timers.is_running(&id);
    Ok(Json(json!({
        "status": "success",
        "data": { "id": id, "running": running, "changed": started }
    })))
}

pub async fn remove_timer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    if !state.timers.remove_task(&id) {
        return Err(AppError::TimerTaskNotFound(id));
    }
    Ok(Json(json!({
        "status": "success",
        "message": format!("Timer task {} removed", id)
    })))
}
