// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API request and response models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::coordinator::WorkerStatusView;
use crate::jobs::RenderJob;
use crate::store::{ErrorRecord, WorkerState};

/// Worker heartbeat body.
///
/// `worker_name` is optional at the serde level so a missing name can
/// be rejected with a 400 rather than a deserialisation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Worker identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    /// Activity state, defaults to idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkerState>,
    /// Uid of the job currently rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<String>,
    /// CPU usage percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    /// Memory usage percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f32>,
    /// Renderer process pid, when rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreal_pid: Option<u32>,
    /// ISO-8601 timestamp of the current render start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_started: Option<String>,
}

impl HeartbeatRequest {
    /// An idle heartbeat carrying system metrics
    pub fn idle(worker_name: &str, cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            worker_name: Some(worker_name.to_string()),
            status: Some(WorkerState::Idle),
            cpu_percent: Some(cpu_percent),
            memory_percent: Some(memory_percent),
            ..Default::default()
        }
    }
}

/// Worker error report body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerErrorRequest {
    /// Worker that encountered the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Error description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Related job uid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_uid: Option<String>,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    /// Always true on success
    pub ok: bool,
}

/// Bulk-delete acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    /// Always true on success
    pub ok: bool,
    /// How many jobs were removed
    pub deleted: usize,
}

/// Response for `GET /api/get`
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    /// Every stored job
    pub results: Vec<RenderJob>,
}

/// Response for `GET /api/jobs/mine/{worker}`
#[derive(Debug, Serialize, Deserialize)]
pub struct MineResponse {
    /// Jobs assigned to the worker
    pub jobs: Vec<RenderJob>,
}

/// Response for `GET /api/workers`
#[derive(Debug, Serialize)]
pub struct WorkersResponse {
    /// Every registered worker with derived online flag
    pub workers: Vec<WorkerStatusView>,
}

/// Response for `GET /api/errors`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorsResponse {
    /// Recent error records, most recent first
    pub errors: Vec<ErrorRecord>,
}

/// Response for `POST /api/submit/{project}`
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmittedResponse {
    /// Uids of the jobs created from the project sequences
    pub submitted: Vec<String>,
}

/// Worker aggregates for the dashboard
#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardWorkers {
    /// Registered workers
    pub total: usize,
    /// Workers with a recent heartbeat
    pub online: usize,
    /// Online workers that are idle
    pub idle: usize,
    /// Online workers that are rendering
    pub rendering: usize,
}

/// Job aggregates for the dashboard
#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardJobs {
    /// Stored jobs
    pub total: usize,
    /// Job counts keyed by wire status string
    pub by_status: BTreeMap<String, usize>,
}

/// Response for `GET /api/dashboard`
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    /// Worker aggregates
    pub workers: DashboardWorkers,
    /// Job aggregates
    pub jobs: DashboardJobs,
    /// The five most recent error records
    pub recent_errors: Vec<ErrorRecord>,
}

/// Response for `GET /api/health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" while the service responds
    pub status: String,
    /// Number of online workers
    pub workers_online: usize,
    /// Whether the watchdog loop is alive
    pub watchdog_running: bool,
}
