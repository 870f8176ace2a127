//! Job controller routes, nested under `/api/jobs`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use scout_core::{JobAction, JobStatus, LogLevel, NewJob, NewSchedule};
use scout_storage::{apply_schema, JobFilter, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const JOB_LOG_LIMIT: i64 = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/setup-schema", post(setup_schema_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/create", post(create_job_handler))
        .route("/jobs/{id}", get(job_detail_handler))
        .route("/jobs/{id}/start", post(start_job_handler))
        .route("/jobs/{id}/pause", post(pause_job_handler))
        .route("/jobs/{id}/cancel", post(cancel_job_handler))
        .route(
            "/schedules",
            get(list_schedules_handler).post(create_schedule_handler),
        )
        .route("/schedules/{id}/toggle", patch(toggle_schedule_handler))
        .route("/dashboard/stats", get(dashboard_stats_handler))
}

async fn setup_schema_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    const FAILED: &str = "Failed to apply database schema";
    let pool = state
        .pool
        .as_ref()
        .ok_or_else(|| ApiError::internal(FAILED, "DATABASE_URL is not configured"))?;
    apply_schema(pool)
        .await
        .map_err(|err| ApiError::internal(FAILED, err))?;
    Ok(Json(json!({
        "success": true,
        "message": "Scraping jobs database schema applied successfully",
    })))
}

#[derive(Debug, Default, Deserialize)]
struct JobsQuery {
    status: Option<String>,
    tool: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<Value>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown job status: {raw}")))?,
        ),
        None => None,
    };
    let filter = JobFilter {
        status,
        tool: query.tool.filter(|t| !t.is_empty()),
        limit: query.limit.unwrap_or(0),
        offset: query.offset.unwrap_or(0),
    };
    let page = state
        .jobs
        .list(&filter)
        .await
        .map_err(|err| ApiError::store("Failed to fetch jobs", err))?;
    Ok(Json(json!({
        "success": true,
        "jobs": page.jobs,
        "total": page.total,
        "limit": filter.effective_limit(),
        "offset": filter.effective_offset(),
    })))
}

async fn job_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    const FAILED: &str = "Failed to fetch job details";
    let job = state
        .jobs
        .get(id)
        .await
        .map_err(|err| ApiError::store(FAILED, err))?;
    let logs = state
        .jobs
        .logs(id, JOB_LOG_LIMIT)
        .await
        .map_err(|err| ApiError::store(FAILED, err))?;
    Ok(Json(json!({ "success": true, "job": job, "logs": logs })))
}

async fn create_job_handler(
    State(state): State<Arc<AppState>>,
    Json(new_job): Json<NewJob>,
) -> ApiResult<Json<Value>> {
    if new_job.tool.trim().is_empty() {
        return Err(ApiError::bad_request("tool must not be empty"));
    }
    if new_job.max_videos_per_term < 1 {
        return Err(ApiError::bad_request("max_videos_per_term must be at least 1"));
    }
    let job = state
        .jobs
        .create(&new_job)
        .await
        .map_err(|err| ApiError::store("Failed to create job", err))?;
    state
        .log_job(job.id, LogLevel::Info, &format!("Job created: {}", job.job_name))
        .await;
    info!(job_id = job.id, tool = %job.tool, "job created");
    Ok(Json(json!({
        "success": true,
        "job": job,
        "message": "Scraping job created successfully",
    })))
}

async fn start_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let job = state
        .jobs
        .transition(id, JobAction::Start)
        .await
        .map_err(|err| ApiError::store("Failed to start job", err))?;
    state.log_job(id, LogLevel::Info, "Job started").await;
    spawn_executor(&state, id);
    Ok(Json(json!({
        "success": true,
        "job": job,
        "message": "Scraping job started",
    })))
}

async fn pause_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let job = state
        .jobs
        .transition(id, JobAction::Pause)
        .await
        .map_err(|err| ApiError::store("Failed to pause job", err))?;
    state.log_job(id, LogLevel::Info, "Job paused").await;
    Ok(Json(json!({
        "success": true,
        "job": job,
        "message": "Job paused successfully",
    })))
}

async fn cancel_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let job = state
        .jobs
        .transition(id, JobAction::Cancel)
        .await
        .map_err(|err| ApiError::store("Failed to cancel job", err))?;
    state.log_job(id, LogLevel::Warning, "Job cancelled").await;
    Ok(Json(json!({
        "success": true,
        "job": job,
        "message": "Job cancelled successfully",
    })))
}

async fn list_schedules_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let schedules = state
        .jobs
        .schedules()
        .await
        .map_err(|err| ApiError::store("Failed to fetch schedules", err))?;
    Ok(Json(json!({ "success": true, "schedules": schedules })))
}

async fn create_schedule_handler(
    State(state): State<Arc<AppState>>,
    Json(schedule): Json<NewSchedule>,
) -> ApiResult<Json<Value>> {
    if schedule.schedule_name.trim().is_empty() || schedule.cron_expression.trim().is_empty() {
        return Err(ApiError::bad_request(
            "schedule_name and cron_expression are required",
        ));
    }
    let created = state
        .jobs
        .create_schedule(&schedule)
        .await
        .map_err(|err| ApiError::store("Failed to create schedule", err))?;
    Ok(Json(json!({
        "success": true,
        "schedule": created,
        "message": "Schedule created successfully",
    })))
}

async fn toggle_schedule_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let schedule = state
        .jobs
        .toggle_schedule(id)
        .await
        .map_err(|err| ApiError::store("Failed to toggle schedule", err))?;
    let verb = if schedule.is_active {
        "activated"
    } else {
        "deactivated"
    };
    Ok(Json(json!({
        "success": true,
        "schedule": schedule,
        "message": format!("Schedule {verb} successfully"),
    })))
}

async fn dashboard_stats_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state
        .jobs
        .stats()
        .await
        .map_err(|err| ApiError::store("Failed to fetch dashboard stats", err))?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

/// Runs the job in the background; the start request does not wait for it.
fn spawn_executor(state: &AppState, job_id: i64) {
    let jobs = state.jobs.clone();
    let Some(executor) = state.executor() else {
        tokio::spawn(async move {
            warn!(job_id, "no search provider configured, failing job");
            if let Err(err) = jobs.fail(job_id, "YOUTUBE_API_KEY is not configured").await {
                error!(job_id, error = %err, "could not mark job failed");
            }
        });
        return;
    };

    tokio::spawn(async move {
        if let Err(err) = executor.run(job_id).await {
            error!(job_id, error = ?err, "job executor failed");
            match jobs.fail(job_id, &format!("{err:#}")).await {
                Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
                Err(err) => error!(job_id, error = %err, "could not mark job failed"),
            }
        }
    });
}
