// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Embedded document store.
//!
//! A single JSON file in the data directory holds three logical
//! tables: `jobs` (keyed by uid), `workers` (keyed by name), and an
//! append-only `errors` log. The store is the serialisation point for
//! the whole system: every read and write takes the table lock, and
//! each mutation rewrites the file atomically (temp file + rename).

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::jobs::RenderJob;

/// Document file name inside the data directory
const STORE_FILE: &str = "farm.json";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while reading or writing the document file
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    /// The document file could not be parsed or serialised
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Worker activity state reported in heartbeats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Available for assignment
    #[default]
    Idle,
    /// Currently running a render
    Rendering,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Rendering => f.write_str("rendering"),
        }
    }
}

/// A worker heartbeat record, upserted on every heartbeat and never
/// removed during normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Worker identity (hostname by default)
    pub name: String,
    /// Activity state from the last heartbeat
    #[serde(default)]
    pub status: WorkerState,
    /// Uid of the job currently rendering, or empty
    #[serde(default)]
    pub current_job: String,
    /// CPU usage percentage from the last heartbeat
    #[serde(default)]
    pub cpu_percent: f32,
    /// Memory usage percentage from the last heartbeat
    #[serde(default)]
    pub memory_percent: f32,
    /// Pid of the renderer process, when rendering
    #[serde(default)]
    pub unreal_pid: Option<u32>,
    /// ISO-8601 timestamp of the current render start, when rendering
    #[serde(default)]
    pub render_started: String,
    /// ISO-8601 timestamp of the last heartbeat, set server-side
    #[serde(default)]
    pub last_seen: String,
}

/// Append-only error log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// ISO-8601 timestamp of the report
    pub timestamp: String,
    /// Worker that reported the error
    pub worker: String,
    /// Related job uid, when known
    #[serde(default)]
    pub job_uid: Option<String>,
    /// Human-readable description
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    jobs: BTreeMap<String, RenderJob>,
    #[serde(default)]
    workers: BTreeMap<String, WorkerRecord>,
    #[serde(default)]
    errors: Vec<ErrorRecord>,
}

/// The embedded document store
pub struct FarmStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FarmStore {
    /// Open (or create) the store in `dir`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE);
        let tables = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Tables::default()
        };
        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(tables)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Insert or replace a job, keyed by uid
    pub fn upsert_job(&self, job: &RenderJob) -> Result<(), StoreError> {
        debug!(uid = %job.uid, "writing job");
        let mut tables = self.tables.lock();
        tables.jobs.insert(job.uid.clone(), job.clone());
        self.persist(&tables)
    }

    /// Look up a job by uid
    pub fn job(&self, uid: &str) -> Option<RenderJob> {
        self.tables.lock().jobs.get(uid).cloned()
    }

    /// Read-modify-write one job under the table lock, so concurrent
    /// mutations of the same uid cannot interleave.
    ///
    /// Returns `Ok(None)` for an unknown uid. The closure may veto
    /// the update by returning an error, in which case nothing is
    /// persisted and the error is handed back.
    pub fn modify_job<E>(
        &self,
        uid: &str,
        f: impl FnOnce(&mut RenderJob) -> Result<(), E>,
    ) -> Result<Option<Result<RenderJob, E>>, StoreError> {
        let mut tables = self.tables.lock();
        let Some(current) = tables.jobs.get(uid) else {
            return Ok(None);
        };
        let mut candidate = current.clone();
        match f(&mut candidate) {
            Err(veto) => Ok(Some(Err(veto))),
            Ok(()) => {
                tables.jobs.insert(uid.to_string(), candidate.clone());
                self.persist(&tables)?;
                Ok(Some(Ok(candidate)))
            }
        }
    }

    /// All jobs, in uid order
    pub fn jobs(&self) -> Vec<RenderJob> {
        self.tables.lock().jobs.values().cloned().collect()
    }

    /// Remove a job; returns whether it existed
    pub fn remove_job(&self, uid: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let existed = tables.jobs.remove(uid).is_some();
        if existed {
            self.persist(&tables)?;
        }
        Ok(existed)
    }

    /// Remove every job; returns how many were deleted
    pub fn clear_jobs(&self) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock();
        let count = tables.jobs.len();
        tables.jobs.clear();
        self.persist(&tables)?;
        Ok(count)
    }

    /// Insert or replace a worker record, keyed by name
    pub fn upsert_worker(&self, worker: &WorkerRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables.workers.insert(worker.name.clone(), worker.clone());
        self.persist(&tables)
    }

    /// Look up a worker by name
    pub fn worker(&self, name: &str) -> Option<WorkerRecord> {
        self.tables.lock().workers.get(name).cloned()
    }

    /// All worker records, in name order
    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.tables.lock().workers.values().cloned().collect()
    }

    /// Append an error record, timestamped now
    pub fn log_error(
        &self,
        worker: &str,
        job_uid: Option<String>,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables.errors.push(ErrorRecord {
            timestamp: Utc::now().to_rfc3339(),
            worker: worker.to_string(),
            job_uid,
            message: message.to_string(),
        });
        self.persist(&tables)
    }

    /// Most recent errors first, up to `limit`
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let tables = self.tables.lock();
        let mut errors = tables.errors.clone();
        errors.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        errors.truncate(limit);
        errors
    }

    /// Drop every error record
    pub fn clear_errors(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables.errors.clear();
        self.persist(&tables)
    }
}
