use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    core::jobs::RunAt,
    domain::{JobData, JobFilter, JobRecord, JobStatus},
    error::{AppError, Result},
    AppState,
};

/// Status snapshot of a job as exposed over HTTP.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub name: String,
    pub data: JobData,
    pub status: JobStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub fail_count: u32,
    pub fail_reason: Option<String>,
    pub repeat_interval: Option<String>,
    pub disabled: bool,
    pub duration_ms: Option<u64>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            status: job.meta.status,
            duration_ms: job.meta.duration_ms,
            id: job.id,
            name: job.name,
            data: job.data,
            next_run_at: job.next_run_at,
            last_run_at: job.last_run_at,
            last_finished_at: job.last_finished_at,
            locked_at: job.locked_at,
            failed_at: job.failed_at,
            fail_count: job.fail_count,
            fail_reason: job.fail_reason,
            repeat_interval: job.repeat_interval,
            disabled: job.disabled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleNowRequest {
    pub name: String,
    #[serde(default)]
    pub data: JobData,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleAtRequest {
    pub name: String,
    pub when: RunAt,
    #[serde(default)]
    pub data: JobData,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRecurringRequest {
    pub name: String,
    pub interval: String,
    #[serde(default)]
    pub data: JobData,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub name: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

impl TryFrom<ListJobsQuery> for JobFilter {
    type Error = AppError;

    fn try_from(query: ListJobsQuery) -> Result<Self> {
        let status = query
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(AppError::ValidationError)?;
        Ok(JobFilter {
            name: query.name,
            status,
            limit: query.limit,
        })
    }
}

fn job_envelope(job: JobRecord) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "job": JobResponse::from(job) }
    }))
}

fn jobs_envelope(jobs: Vec<JobRecord>) -> Json<Value> {
    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    Json(json!({
        "status": "success",
        "data": { "count": jobs.len(), "jobs": jobs }
    }))
}

pub async fn schedule_now_handler(
    State(state): State<AppState>,
    Json(body): Json<ScheduleNowRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let job = state.scheduler.schedule_now(&body.name, body.data).await?;
    Ok((StatusCode::CREATED, job_envelope(job)))
}

pub async fn schedule_at_handler(
    State(state): State<AppState>,
    Json(body): Json<ScheduleAtRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let job = state
        .scheduler
        .schedule_at(&body.name, body.when, body.data)
        .await?;
    Ok((StatusCode::CREATED, job_envelope(job)))
}

pub async fn schedule_recurring_handler(
    State(state): State<AppState>,
    Json(body): Json<ScheduleRecurringRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let job = state
        .scheduler
        .schedule_recurring(&body.name, &body.interval, body.data)
        .await?;
    Ok((StatusCode::CREATED, job_envelope(job)))
}

pub async fn list_jobs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Value>> {
    let jobs = state.scheduler.list_jobs(JobFilter::try_from(query)?).await?;
    Ok(jobs_envelope(jobs))
}

pub async fn list_running_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    Ok(jobs_envelope(state.scheduler.list_running().await?))
}

pub async fn list_failed_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    Ok(jobs_envelope(state.scheduler.list_failed().await?))
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(job_envelope(state.scheduler.get_job(&id).await?))
}

pub async fn cancel_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.scheduler.cancel_job(&id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Job {} cancelled", id)
    })))
}

pub async fn retry_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(job_envelope(state.scheduler.retry_job(&id).await?))
}

pub async fn disable_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(job_envelope(state.scheduler.disable_job(&id).await?))
}

pub async fn enable_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(job_envelope(state.scheduler.enable_job(&id).await?))
}

pub async fn purge_completed_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    let removed = state.scheduler.purge_completed().await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "removed": removed }
    })))
}
