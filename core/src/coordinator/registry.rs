// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker registry views.
//!
//! Workers are upserted on heartbeat and never explicitly removed;
//! liveness is derived at read time from `last_seen`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::store::WorkerState;

use super::Coordinator;

/// A worker record with its derived `online` flag
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusView {
    /// Worker identity
    pub name: String,
    /// Activity state from the last heartbeat
    pub status: WorkerState,
    /// Whether the last heartbeat is within the worker timeout
    pub online: bool,
    /// Uid of the job currently rendering, or empty
    pub current_job: String,
    /// CPU usage percentage from the last heartbeat
    pub cpu_percent: f32,
    /// Memory usage percentage from the last heartbeat
    pub memory_percent: f32,
    /// ISO-8601 timestamp of the last heartbeat
    pub last_seen: String,
}

/// Whether a `last_seen` timestamp is within `timeout` of `now`.
/// Empty or unparsable timestamps count as offline.
pub fn is_online(last_seen: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(last_seen) {
        Ok(seen) => {
            let elapsed = now.signed_duration_since(seen.with_timezone(&Utc));
            elapsed.num_seconds() >= 0 && (elapsed.num_seconds() as u64) < timeout.as_secs()
        }
        Err(_) => false,
    }
}

impl Coordinator {
    /// Snapshot of every registered worker with `online` computed
    /// against the coordinator's worker timeout.
    pub fn workers_status(&self) -> Vec<WorkerStatusView> {
        let now = Utc::now();
        self.store()
            .workers()
            .into_iter()
            .map(|w| WorkerStatusView {
                online: is_online(&w.last_seen, self.worker_timeout, now),
                name: w.name,
                status: w.status,
                current_job: w.current_job,
                cpu_percent: w.cpu_percent,
                memory_percent: w.memory_percent,
                last_seen: w.last_seen,
            })
            .collect()
    }
}
