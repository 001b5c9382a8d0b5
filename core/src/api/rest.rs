// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! REST API routes and handlers.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use std::collections::BTreeMap;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::RateLimits;
use crate::api::models::*;
use crate::api::AppState;
use crate::jobs::{is_valid_transition, JobPatch, RenderJob, RenderStatus, MAX_RETRIES};
use crate::store::{WorkerRecord, WorkerState};
use crate::submit::ProjectConfig;

/// Assemble the API routes. Rate limiting is keyed by peer IP and is
/// only applied when `limits` is set; tests run without it.
pub(crate) fn routes(limits: Option<RateLimits>) -> Router<AppState> {
    let mut update_route = put(update_job);
    if let Some(limits) = limits {
        let conf = std::sync::Arc::new(
            GovernorConfigBuilder::default()
                .per_millisecond(RateLimits::replenish_ms(limits.put_per_minute))
                .burst_size(limits.put_per_minute.max(1))
                .finish()
                .expect("valid rate limit configuration"),
        );
        update_route = update_route.layer(GovernorLayer { config: conf });
    }

    let mut router = Router::new()
        .route("/api/health", get(health))
        .route("/api/dashboard", get(dashboard))
        .route("/api/get", get(list_jobs))
        .route("/api/get/:uid", get(get_job))
        .route("/api/jobs/mine/:worker", get(jobs_for_worker))
        .route("/api/post", post(create_job))
        .route("/api/put/:uid", update_route)
        .route("/api/cancel/:uid", post(cancel_job))
        .route("/api/retry/:uid", post(retry_job))
        .route("/api/delete/:uid", delete(delete_job))
        .route("/api/delete-all", delete(delete_all_jobs))
        .route("/api/submit/:project", post(submit_project))
        .route("/api/worker/heartbeat", post(worker_heartbeat))
        .route("/api/worker/error", post(worker_error))
        .route("/api/workers", get(list_workers))
        .route("/api/errors", get(list_errors).delete(clear_errors));

    if let Some(limits) = limits {
        let conf = std::sync::Arc::new(
            GovernorConfigBuilder::default()
                .per_millisecond(RateLimits::replenish_ms(limits.default_per_minute))
                .burst_size(limits.default_per_minute.max(1))
                .finish()
                .expect("valid rate limit configuration"),
        );
        router = router.layer(GovernorLayer { config: conf });
    }

    router
}

/// Health check: online worker count and watchdog liveness
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let workers_online = state
        .coordinator
        .workers_status()
        .iter()
        .filter(|w| w.online)
        .count();
    Json(HealthResponse {
        status: "healthy".to_string(),
        workers_online,
        watchdog_running: state.coordinator.watchdog_running(),
    })
}

/// Aggregated counts for the dashboard
async fn dashboard(State(state): State<AppState>) -> ApiResult<Json<DashboardResponse>> {
    let workers = state.coordinator.workers_status();
    let jobs = state.coordinator.store().jobs();

    let online = workers.iter().filter(|w| w.online).count();
    let idle = workers
        .iter()
        .filter(|w| w.online && w.status == WorkerState::Idle)
        .count();
    let rendering = workers
        .iter()
        .filter(|w| w.online && w.status == WorkerState::Rendering)
        .count();

    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    for job in &jobs {
        *by_status.entry(job.status.as_str().to_string()).or_default() += 1;
    }

    Ok(Json(DashboardResponse {
        workers: DashboardWorkers {
            total: workers.len(),
            online,
            idle,
            rendering,
        },
        jobs: DashboardJobs {
            total: jobs.len(),
            by_status,
        },
        recent_errors: state.coordinator.store().recent_errors(5),
    }))
}

/// All render jobs
async fn list_jobs(State(state): State<AppState>) -> Json<ResultsResponse> {
    Json(ResultsResponse {
        results: state.coordinator.store().jobs(),
    })
}

/// A single job by uid
async fn get_job(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<RenderJob>> {
    state
        .coordinator
        .store()
        .job(&uid)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("job not found".to_string()))
}

/// Jobs assigned to one worker; cheaper than `/api/get` for polling
async fn jobs_for_worker(
    State(state): State<AppState>,
    Path(worker): Path<String>,
) -> Json<MineResponse> {
    let jobs = state
        .coordinator
        .store()
        .jobs()
        .into_iter()
        .filter(|j| j.worker == worker)
        .collect();
    Json(MineResponse { jobs })
}

/// Create a job from a partial document, then attempt assignment
async fn create_job(
    State(state): State<AppState>,
    Json(patch): Json<JobPatch>,
) -> ApiResult<Json<RenderJob>> {
    let mut job = RenderJob::from_partial(patch);
    state.coordinator.store().upsert_job(&job)?;
    state.coordinator.dispatch(&mut job)?;
    Ok(Json(job))
}

fn parse_legacy_body(body: &str) -> Option<JobPatch> {
    // "progress;time_estimate;status", sent by older bridges.
    let mut parts = body.trim().splitn(3, ';');
    let progress = parts.next()?.trim().parse::<f64>().ok()?;
    let time_estimate = parts.next()?.trim().to_string();
    let status = RenderStatus::from_wire(parts.next()?.trim())?;
    Some(JobPatch {
        progress: Some(progress),
        time_estimate: Some(time_estimate),
        status: Some(status),
        ..Default::default()
    })
}

/// Update a job from a JSON patch (or a legacy plaintext body),
/// enforcing the status state machine
async fn update_job(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    body: String,
) -> ApiResult<Json<RenderJob>> {
    let patch = match serde_json::from_str::<JobPatch>(&body) {
        Ok(patch) => patch,
        Err(_) => parse_legacy_body(&body)
            .ok_or_else(|| ApiError::BadRequest("invalid request body".to_string()))?,
    };

    let result = state.coordinator.store().modify_job(&uid, |job| {
        if let Some(requested) = patch.status {
            if requested != job.status && !is_valid_transition(job.status, requested) {
                warn!(%uid, current = %job.status, %requested, "invalid state transition");
                return Err(ApiError::InvalidTransition {
                    current: job.status,
                    requested,
                });
            }
        }
        job.apply(&patch);
        Ok(())
    })?;

    match result {
        None => Err(ApiError::NotFound("job not found".to_string())),
        Some(Err(rejected)) => Err(rejected),
        Some(Ok(job)) => Ok(Json(job)),
    }
}

/// Forced transition to cancelled; the worker notices on its next poll
async fn cancel_job(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<RenderJob>> {
    let result = state.coordinator.store().modify_job::<ApiError>(&uid, |job| {
        job.status = RenderStatus::Cancelled;
        Ok(())
    })?;

    match result {
        None => Err(ApiError::NotFound("job not found".to_string())),
        Some(Err(rejected)) => Err(rejected),
        Some(Ok(job)) => {
            info!(%uid, "cancelled job");
            Ok(Json(job))
        }
    }
}

/// Operator-initiated retry of an errored or cancelled job
async fn retry_job(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<RenderJob>> {
    // Crossing the ceiling both persists the failed status and
    // rejects the request, so the veto path cannot express it; the
    // closure records it instead.
    let mut exhausted = None;
    let result = state.coordinator.store().modify_job(&uid, |job| {
        if !matches!(job.status, RenderStatus::Errored | RenderStatus::Cancelled) {
            return Err(ApiError::BadRequest(
                "can only retry errored or cancelled jobs".to_string(),
            ));
        }

        let new_retry_count = job.retry_count + 1;
        if new_retry_count > MAX_RETRIES {
            job.status = RenderStatus::Failed;
            exhausted = Some(ApiError::RetryExhausted {
                retry_count: new_retry_count,
            });
            return Ok(());
        }

        job.retry_count = new_retry_count;
        job.error_message.clear();
        job.progress = 0;
        job.status = RenderStatus::ReadyToStart;
        Ok(())
    })?;

    match result {
        None => Err(ApiError::NotFound("job not found".to_string())),
        Some(Err(rejected)) => Err(rejected),
        Some(Ok(job)) => {
            if let Some(exhausted) = exhausted {
                return Err(exhausted);
            }
            info!(%uid, attempt = job.retry_count, "retrying job");
            Ok(Json(job))
        }
    }
}

/// Delete one job; deleting an unknown uid is not an error
async fn delete_job(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    state.coordinator.store().remove_job(&uid)?;
    Ok(Json(OkResponse { ok: true }))
}

/// Delete every job
async fn delete_all_jobs(State(state): State<AppState>) -> ApiResult<Json<DeletedResponse>> {
    let deleted = state.coordinator.store().clear_jobs()?;
    info!(deleted, "deleted all jobs");
    Ok(Json(DeletedResponse { ok: true, deleted }))
}

/// Submit every sequence of a named project config
async fn submit_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<SubmittedResponse>> {
    if project.contains(['/', '\\']) || project.contains("..") {
        return Err(ApiError::BadRequest("invalid project name".to_string()));
    }
    let path = state.projects_dir.join(&project);
    if !path.is_file() {
        return Err(ApiError::NotFound("project not found".to_string()));
    }
    let config = ProjectConfig::load(&path).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut submitted = Vec::with_capacity(config.sequences.len());
    for seq in &config.sequences {
        let mut job = RenderJob::from_partial(config.job_patch_for(seq));
        state.coordinator.store().upsert_job(&job)?;
        state.coordinator.dispatch(&mut job)?;
        submitted.push(job.uid);
    }

    info!(count = submitted.len(), %project, "submitted project jobs");
    Ok(Json(SubmittedResponse { submitted }))
}

/// Worker heartbeat: upsert the worker with a server-side `last_seen`
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(hb): Json<HeartbeatRequest>,
) -> ApiResult<Json<OkResponse>> {
    let Some(worker_name) = hb.worker_name.filter(|n| !n.is_empty()) else {
        return Err(ApiError::BadRequest("worker_name required".to_string()));
    };

    let record = WorkerRecord {
        name: worker_name.clone(),
        status: hb.status.unwrap_or_default(),
        current_job: hb.current_job.unwrap_or_default(),
        cpu_percent: hb.cpu_percent.unwrap_or(0.0),
        memory_percent: hb.memory_percent.unwrap_or(0.0),
        unreal_pid: hb.unreal_pid,
        render_started: hb.render_started.unwrap_or_default(),
        last_seen: Utc::now().to_rfc3339(),
    };
    state.coordinator.store().upsert_worker(&record)?;
    debug!(worker = %worker_name, "heartbeat");
    Ok(Json(OkResponse { ok: true }))
}

/// Record an error reported by a worker
async fn worker_error(
    State(state): State<AppState>,
    Json(report): Json<WorkerErrorRequest>,
) -> ApiResult<Json<OkResponse>> {
    let worker = report.worker.unwrap_or_default();
    let message = report
        .message
        .unwrap_or_else(|| "Unknown error".to_string());
    state
        .coordinator
        .store()
        .log_error(&worker, report.job_uid, &message)?;
    warn!(%worker, %message, "error from worker");
    Ok(Json(OkResponse { ok: true }))
}

/// All registered workers with derived online flags
async fn list_workers(State(state): State<AppState>) -> Json<WorkersResponse> {
    Json(WorkersResponse {
        workers: state.coordinator.workers_status(),
    })
}

/// The 20 most recent error records
async fn list_errors(State(state): State<AppState>) -> Json<ErrorsResponse> {
    Json(ErrorsResponse {
        errors: state.coordinator.store().recent_errors(20),
    })
}

/// Drop the error log
async fn clear_errors(State(state): State<AppState>) -> ApiResult<Json<OkResponse>> {
    state.coordinator.store().clear_errors()?;
    info!("cleared error log");
    Ok(Json(OkResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_body() {
        let patch = parse_legacy_body("45.5;0h:3m:12s;in progress").unwrap();
        assert_eq!(patch.progress, Some(45.5));
        assert_eq!(patch.time_estimate.as_deref(), Some("0h:3m:12s"));
        assert_eq!(patch.status, Some(RenderStatus::InProgress));
    }

    #[test]
    fn test_parse_legacy_body_rejects_garbage() {
        assert!(parse_legacy_body("not a legacy body").is_none());
        assert!(parse_legacy_body("50;eta").is_none());
        assert!(parse_legacy_body("50;eta;bogus status").is_none());
    }
}
