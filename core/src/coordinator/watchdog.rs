// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stuck-job watchdog.
//!
//! A single background task scans `in progress` jobs and re-queues
//! any whose worker is no longer credible: absent, offline, or past
//! the job timeout. Reset jobs go back through the assignment policy.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::jobs::RenderStatus;
use crate::store::StoreError;

use super::Coordinator;

impl Coordinator {
    /// One watchdog pass over every job.
    ///
    /// Only `in progress` jobs are considered; the first matching
    /// rule wins. A stuck job loses its worker, records the reset
    /// reason in `error_message` and the error log, transitions back
    /// to `ready to start`, and is fed through assignment again.
    pub fn check_stuck_jobs(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        let workers: HashMap<String, bool> = self
            .workers_status()
            .into_iter()
            .map(|w| (w.name, w.online))
            .collect();

        for mut job in self.store().jobs() {
            if job.status != RenderStatus::InProgress {
                continue;
            }

            let reason = if job.worker.is_empty() {
                Some("no worker assigned".to_string())
            } else {
                match workers.get(&job.worker) {
                    None => Some(format!("worker {} not registered", job.worker)),
                    Some(false) => Some(format!("worker {} is offline", job.worker)),
                    Some(true) => self.exceeded_job_timeout(&job.started_at, now),
                }
            };

            if let Some(reason) = reason {
                warn!(uid = %job.uid, %reason, "resetting stuck job");
                job.worker.clear();
                job.status = RenderStatus::ReadyToStart;
                job.error_message = format!("Reset: {reason}");
                self.store().upsert_job(&job)?;
                self.store()
                    .log_error("watchdog", Some(job.uid.clone()), &job.error_message)?;
                self.dispatch(&mut job)?;
            }
        }
        Ok(())
    }

    fn exceeded_job_timeout(&self, started_at: &str, now: DateTime<Utc>) -> Option<String> {
        let started = DateTime::parse_from_rfc3339(started_at).ok()?;
        let elapsed = now.signed_duration_since(started.with_timezone(&Utc));
        if elapsed.num_seconds() > self.job_timeout.as_secs() as i64 {
            Some(format!(
                "job exceeded {}s timeout",
                self.job_timeout.as_secs()
            ))
        } else {
            None
        }
    }

    /// Spawn the watchdog loop with the given wake interval.
    ///
    /// The loop runs until [`Coordinator::stop_watchdog`] fires; a
    /// failing pass is logged and does not kill the loop.
    pub fn spawn_watchdog(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let coordinator = self;
        let mut stop = coordinator.watchdog_stop.subscribe();
        tokio::spawn(async move {
            coordinator.watchdog_alive.store(true, Ordering::SeqCst);
            info!("job watchdog started");

            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.check_stuck_jobs() {
                            error!("watchdog error: {e}");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }

            coordinator.watchdog_alive.store(false, Ordering::SeqCst);
            info!("job watchdog stopped");
        })
    }

    /// Signal the watchdog loop to exit
    pub fn stop_watchdog(&self) {
        let _ = self.watchdog_stop.send(true);
    }

    /// Whether the watchdog loop is currently running
    pub fn watchdog_running(&self) -> bool {
        self.watchdog_alive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobPatch, RenderJob};
    use crate::store::{FarmStore, WorkerRecord, WorkerState};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    const WORKER_TIMEOUT: Duration = Duration::from_secs(30);
    const JOB_TIMEOUT: Duration = Duration::from_secs(1800);

    fn coordinator() -> (Arc<Coordinator>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FarmStore::open(dir.path()).unwrap());
        (
            Arc::new(Coordinator::new(store, WORKER_TIMEOUT, JOB_TIMEOUT)),
            dir,
        )
    }

    fn register_worker(coordinator: &Coordinator, name: &str, status: WorkerState, age_secs: i64) {
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
                last_seen: (Utc::now() - ChronoDuration::seconds(age_secs)).to_rfc3339(),
            })
            .unwrap();
    }

    fn in_progress_job(coordinator: &Coordinator, worker: &str, started_at: &str) -> RenderJob {
        let mut job = RenderJob::from_partial(JobPatch {
            name: Some("stuck-candidate".to_string()),
            ..Default::default()
        });
        job.status = RenderStatus::InProgress;
        job.worker = worker.to_string();
        job.started_at = started_at.to_string();
        coordinator.store().upsert_job(&job).unwrap();
        job
    }

    #[test]
    fn test_offline_worker_job_is_reset() {
        let (coordinator, _dir) = coordinator();
        register_worker(&coordinator, "offline-node", WorkerState::Rendering, 40);
        let job = in_progress_job(&coordinator, "offline-node", "");

        coordinator.check_stuck_jobs().unwrap();

        let reloaded = coordinator.store().job(&job.uid).unwrap();
        assert_eq!(reloaded.status, RenderStatus::ReadyToStart);
        assert_eq!(reloaded.worker, "");
        assert!(reloaded.error_message.starts_with("Reset:"));
        assert!(reloaded.error_message.contains("offline"));
    }

    #[test]
    fn test_online_worker_job_is_untouched() {
        let (coordinator, _dir) = coordinator();
        register_worker(&coordinator, "online-node", WorkerState::Rendering, 0);
        let started = Utc::now().to_rfc3339();
        let job = in_progress_job(&coordinator, "online-node", &started);

        coordinator.check_stuck_jobs().unwrap();

        let reloaded = coordinator.store().job(&job.uid).unwrap();
        assert_eq!(reloaded.status, RenderStatus::InProgress);
        assert_eq!(reloaded.worker, "online-node");
    }

    #[test]
    fn test_unregistered_worker_job_is_reset() {
        let (coordinator, _dir) = coordinator();
        let job = in_progress_job(&coordinator, "ghost-node", "");

        coordinator.check_stuck_jobs().unwrap();

        let reloaded = coordinator.store().job(&job.uid).unwrap();
        assert_eq!(reloaded.status, RenderStatus::ReadyToStart);
        assert_eq!(reloaded.worker, "");
        assert!(reloaded.error_message.contains("not registered"));
    }

    #[test]
    fn test_workerless_job_is_reset() {
        let (coordinator, _dir) = coordinator();
        let job = in_progress_job(&coordinator, "", "");

        coordinator.check_stuck_jobs().unwrap();

        let reloaded = coordinator.store().job(&job.uid).unwrap();
        assert_eq!(reloaded.status, RenderStatus::ReadyToStart);
        assert!(reloaded.error_message.contains("no worker assigned"));
    }

    #[test]
    fn test_job_past_timeout_is_reset_even_with_online_worker() {
        let (coordinator, _dir) = coordinator();
        register_worker(&coordinator, "online-node", WorkerState::Rendering, 0);
        let started = (Utc::now() - ChronoDuration::hours(5)).to_rfc3339();
        let job = in_progress_job(&coordinator, "online-node", &started);

        coordinator.check_stuck_jobs().unwrap();

        let reloaded = coordinator.store().job(&job.uid).unwrap();
        assert_eq!(reloaded.status, RenderStatus::ReadyToStart);
        assert!(reloaded.error_message.contains("exceeded"));
    }

    #[test]
    fn test_fresh_job_with_online_worker_survives() {
        let (coordinator, _dir) = coordinator();
        register_worker(&coordinator, "online-node", WorkerState::Rendering, 0);
        let started = (Utc::now() - ChronoDuration::seconds(10)).to_rfc3339();
        let job = in_progress_job(&coordinator, "online-node", &started);

        coordinator.check_stuck_jobs().unwrap();

        assert_eq!(
            coordinator.store().job(&job.uid).unwrap().status,
            RenderStatus::InProgress
        );
    }

    #[test]
    fn test_other_statuses_are_ignored() {
        let (coordinator, _dir) = coordinator();
        for status in [
            RenderStatus::ReadyToStart,
            RenderStatus::Finished,
            RenderStatus::Errored,
        ] {
            let mut job = RenderJob::from_partial(JobPatch {
                name: Some(format!("ignored-{status}")),
                ..Default::default()
            });
            job.status = status;
            job.worker = "ghost-node".to_string();
            coordinator.store().upsert_job(&job).unwrap();

            coordinator.check_stuck_jobs().unwrap();
            assert_eq!(coordinator.store().job(&job.uid).unwrap().status, status);
        }
    }

    #[test]
    fn test_reset_job_is_reassigned_to_idle_worker() {
        let (coordinator, _dir) = coordinator();
        register_worker(&coordinator, "fresh-node", WorkerState::Idle, 0);
        let job = in_progress_job(&coordinator, "ghost-node", "");

        coordinator.check_stuck_jobs().unwrap();

        let reloaded = coordinator.store().job(&job.uid).unwrap();
        assert_eq!(reloaded.status, RenderStatus::ReadyToStart);
        assert_eq!(reloaded.worker, "fresh-node");
    }

    #[test]
    fn test_reset_is_recorded_in_error_log() {
        let (coordinator, _dir) = coordinator();
        let job = in_progress_job(&coordinator, "ghost-node", "");

        coordinator.check_stuck_jobs().unwrap();

        let errors = coordinator.store().recent_errors(5);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].worker, "watchdog");
        assert_eq!(errors[0].job_uid.as_deref(), Some(job.uid.as_str()));
        assert!(errors[0].message.starts_with("Reset:"));
    }

    #[tokio::test]
    async fn test_watchdog_lifecycle() {
        let (coordinator, _dir) = coordinator();
        assert!(!coordinator.watchdog_running());

        let handle = Arc::clone(&coordinator).spawn_watchdog(Duration::from_secs(60));
        // Give the task a chance to start.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.watchdog_running());

        coordinator.stop_watchdog();
        handle.await.unwrap();
        assert!(!coordinator.watchdog_running());
    }
}
