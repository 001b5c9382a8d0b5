// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Coordinator state and the job assignment policy.
//!
//! The coordinator holds no long-lived in-memory state beyond the
//! round-robin cursor and the watchdog control handles; everything
//! else lives in the store.

pub mod registry;
pub mod watchdog;

use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::jobs::{RenderJob, RenderStatus};
use crate::store::{FarmStore, StoreError, WorkerState};

pub use registry::WorkerStatusView;

/// Watchdog wake interval
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Coordinator context shared by the HTTP handlers and the watchdog
pub struct Coordinator {
    store: Arc<FarmStore>,
    worker_timeout: Duration,
    job_timeout: Duration,
    last_assigned: Mutex<Option<String>>,
    watchdog_alive: AtomicBool,
    watchdog_stop: watch::Sender<bool>,
}

impl Coordinator {
    /// Create a coordinator over `store`.
    ///
    /// `worker_timeout` is the heartbeat silence after which a worker
    /// counts as offline; `job_timeout` is how long an `in progress`
    /// job may run before the watchdog declares it stuck.
    pub fn new(store: Arc<FarmStore>, worker_timeout: Duration, job_timeout: Duration) -> Self {
        let (watchdog_stop, _) = watch::channel(false);
        Self {
            store,
            worker_timeout,
            job_timeout,
            last_assigned: Mutex::new(None),
            watchdog_alive: AtomicBool::new(false),
            watchdog_stop,
        }
    }

    /// The underlying document store
    pub fn store(&self) -> &Arc<FarmStore> {
        &self.store
    }

    /// Pick the next available worker round-robin.
    ///
    /// Candidates are workers that are online AND idle, in stable
    /// lexical order. The cursor advances past the previously
    /// assigned worker when it is still a candidate, otherwise the
    /// first candidate is chosen.
    pub fn available_worker(&self) -> Option<String> {
        let mut candidates: Vec<String> = self
            .workers_status()
            .into_iter()
            .filter(|w| w.online && w.status == WorkerState::Idle)
            .map(|w| w.name)
            .collect();
        candidates.sort();
        if candidates.is_empty() {
            return None;
        }

        let mut cursor = self.last_assigned.lock();
        let chosen = match cursor
            .as_ref()
            .and_then(|last| candidates.iter().position(|c| c == last))
        {
            Some(idx) => candidates[(idx + 1) % candidates.len()].clone(),
            None => candidates[0].clone(),
        };
        *cursor = Some(chosen.clone());
        Some(chosen)
    }

    /// Assignment trigger for newly created or re-queued jobs.
    ///
    /// A job that already has a worker is left alone. Otherwise the
    /// round-robin policy picks a worker and the job transitions
    /// `un-assigned -> ready to start`; with no candidates the job
    /// stays unassigned and will be re-attempted on the next
    /// submission or watchdog pass.
    pub fn dispatch(&self, job: &mut RenderJob) -> Result<(), StoreError> {
        if !job.worker.is_empty() {
            return Ok(());
        }

        let Some(worker) = self.available_worker() else {
            warn!(uid = %job.uid, "no workers available for job");
            return Ok(());
        };

        job.worker = worker.clone();
        job.status = RenderStatus::ReadyToStart;
        self.store.upsert_job(job)?;
        info!(uid = %job.uid, %worker, "assigned job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobPatch;
    use crate::store::WorkerRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    fn coordinator() -> (Arc<Coordinator>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FarmStore::open(dir.path()).unwrap());
        let coordinator = Arc::new(Coordinator::new(
            store,
            Duration::from_secs(30),
            Duration::from_secs(1800),
        ));
        (coordinator, dir)
    }

    fn register(coordinator: &Coordinator, name: &str, status: WorkerState) {
        coordinator
            .store()
            .upsert_worker(&WorkerRecord {
                name: name.to_string(),
                status,
                current_job: String::new(),
                cpu_percent: 0.0,
                memory_percent: 0.0,
                unreal_pid: None,
                render_started: String::new(),
                last_seen: Utc::now().to_rfc3339(),
            })
            .unwrap();
    }

    fn new_job(name: &str) -> RenderJob {
        RenderJob::from_partial(JobPatch {
            name: Some(name.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_no_workers_leaves_job_unassigned() {
        let (coordinator, _dir) = coordinator();
        let mut job = new_job("lonely");
        coordinator.store().upsert_job(&job).unwrap();
        coordinator.dispatch(&mut job).unwrap();

        assert_eq!(job.worker, "");
        assert_eq!(job.status, RenderStatus::Unassigned);
    }

    #[test]
    fn test_idle_worker_gets_job() {
        let (coordinator, _dir) = coordinator();
        register(&coordinator, "n1", WorkerState::Idle);

        let mut job = new_job("assigned");
        coordinator.store().upsert_job(&job).unwrap();
        coordinator.dispatch(&mut job).unwrap();

        assert_eq!(job.worker, "n1");
        assert_eq!(job.status, RenderStatus::ReadyToStart);
        assert_eq!(
            coordinator.store().job(&job.uid).unwrap().status,
            RenderStatus::ReadyToStart
        );
    }

    #[test]
    fn test_rendering_worker_is_not_a_candidate() {
        let (coordinator, _dir) = coordinator();
        register(&coordinator, "busy", WorkerState::Rendering);

        let mut job = new_job("waiting");
        coordinator.dispatch(&mut job).unwrap();
        assert_eq!(job.worker, "");
    }

    #[test]
    fn test_round_robin_alternates_between_idle_workers() {
        let (coordinator, _dir) = coordinator();
        register(&coordinator, "n1", WorkerState::Idle);
        register(&coordinator, "n2", WorkerState::Idle);

        let mut assigned = Vec::new();
        for i in 0..3 {
            let mut job = new_job(&format!("job-{i}"));
            coordinator.store().upsert_job(&job).unwrap();
            coordinator.dispatch(&mut job).unwrap();
            assigned.push(job.worker);
        }

        // Alternation, never the same worker three times in a row.
        assert!(assigned == ["n1", "n2", "n1"] || assigned == ["n2", "n1", "n2"]);
    }

    #[test]
    fn test_cursor_resets_when_last_assigned_disappears() {
        let (coordinator, _dir) = coordinator();
        register(&coordinator, "n1", WorkerState::Idle);
        register(&coordinator, "n2", WorkerState::Idle);

        assert_eq!(coordinator.available_worker(), Some("n1".to_string()));
        assert_eq!(coordinator.available_worker(), Some("n2".to_string()));

        // n2 goes busy; the cursor no longer matches a candidate, so
        // selection falls back to the first candidate.
        register(&coordinator, "n2", WorkerState::Rendering);
        assert_eq!(coordinator.available_worker(), Some("n1".to_string()));
    }

    #[test]
    fn test_dispatch_keeps_existing_assignment() {
        let (coordinator, _dir) = coordinator();
        register(&coordinator, "n1", WorkerState::Idle);

        let mut job = new_job("pinned");
        job.worker = "elsewhere".to_string();
        job.status = RenderStatus::ReadyToStart;
        coordinator.dispatch(&mut job).unwrap();

        assert_eq!(job.worker, "elsewhere");
    }
}
