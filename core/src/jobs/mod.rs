// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Render job model and status enumeration.

pub mod transitions;

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use transitions::{allowed_transitions, is_valid_transition};

/// Maximum retry attempts before a job is marked as failed
pub const MAX_RETRIES: u32 = 3;

/// Render job status.
///
/// The wire strings are normative: older bridges send and compare the
/// exact values below, so every variant has a single canonical
/// serialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderStatus {
    /// Created but not yet assigned to a worker
    #[serde(rename = "un-assigned")]
    Unassigned,
    /// Assigned to a worker, waiting to be picked up
    #[serde(rename = "ready to start")]
    ReadyToStart,
    /// A worker is rendering the job
    #[serde(rename = "in progress")]
    InProgress,
    /// Render completed successfully (terminal)
    #[serde(rename = "finished")]
    Finished,
    /// Render failed; eligible for retry
    #[serde(rename = "errored")]
    Errored,
    /// Retry ceiling hit (terminal)
    #[serde(rename = "failed")]
    Failed,
    /// Cancelled by the operator; restart allowed
    #[serde(rename = "cancelled")]
    Cancelled,
    /// Paused by the operator
    #[serde(rename = "paused")]
    Paused,
}

impl RenderStatus {
    /// Every status, in declaration order
    pub const ALL: [RenderStatus; 8] = [
        RenderStatus::Unassigned,
        RenderStatus::ReadyToStart,
        RenderStatus::InProgress,
        RenderStatus::Finished,
        RenderStatus::Errored,
        RenderStatus::Failed,
        RenderStatus::Cancelled,
        RenderStatus::Paused,
    ];

    /// The canonical wire string for this status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unassigned => "un-assigned",
            Self::ReadyToStart => "ready to start",
            Self::InProgress => "in progress",
            Self::Finished => "finished",
            Self::Errored => "errored",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Parse a wire string back into a status
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// True for statuses with no outbound transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A render job tracked end-to-end by the farm.
///
/// Timestamps (`started_at`, `completed_at`) are ISO-8601 strings and
/// empty when not applicable; the watchdog tolerates unparsable
/// values. `length` is derived from `end_frame - start_frame` once at
/// construction and never re-derived on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    /// Stable 8-character identifier, primary key
    pub uid: String,
    /// Human label
    pub name: String,
    /// Submitter hostname
    pub owner: String,
    /// Name of the assigned worker, or empty
    #[serde(default)]
    pub worker: String,
    /// Creation timestamp in `%m/%d/%Y, %H:%M:%S` format
    pub time_created: String,
    /// Priority 0-100 (stored but not consulted by the scheduler yet)
    #[serde(default)]
    pub priority: u32,
    /// Opaque user metadata
    #[serde(default)]
    pub category: String,
    /// Opaque user metadata
    #[serde(default)]
    pub tags: Vec<String>,
    /// Current lifecycle status
    pub status: RenderStatus,
    /// Renderer path to the map/level asset
    #[serde(default)]
    pub umap_path: String,
    /// Renderer path to the sequence asset
    #[serde(default)]
    pub useq_path: String,
    /// Renderer path to the preset/config asset
    #[serde(default)]
    pub uconfig_path: String,
    /// Output directory
    #[serde(default)]
    pub output_path: String,
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Output frame rate
    pub frame_rate: u32,
    /// Output format
    pub format: String,
    /// Custom render start frame
    #[serde(default)]
    pub start_frame: i64,
    /// Custom render end frame
    #[serde(default)]
    pub end_frame: i64,
    /// Frame count, derived at creation from `end_frame - start_frame`
    #[serde(default)]
    pub length: i64,
    /// Remaining-time estimate reported by the renderer
    #[serde(default)]
    pub time_estimate: String,
    /// Render progress 0-100
    #[serde(default)]
    pub progress: u8,
    /// Current engine warmup frame
    #[serde(default)]
    pub warmup_current: u32,
    /// Total engine warmup frames
    #[serde(default)]
    pub warmup_total: u32,
    /// Last failure description, empty if none
    #[serde(default)]
    pub error_message: String,
    /// Number of operator-initiated retries, capped at [`MAX_RETRIES`]
    #[serde(default)]
    pub retry_count: u32,
    /// ISO-8601 timestamp set by the worker when the render starts
    #[serde(default)]
    pub started_at: String,
    /// ISO-8601 timestamp set by the worker on a terminal outcome
    #[serde(default)]
    pub completed_at: String,
}

/// Partial job document.
///
/// Every field is optional; `None` means "do not touch". POST bodies
/// hydrate into a full job through [`RenderJob::from_partial`], PUT
/// bodies apply through [`RenderJob::apply`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    /// Job uid; generated when absent on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Human label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Submitter hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Assigned worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
    /// Priority 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Opaque user metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Opaque user metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Requested status; PUT validates the transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RenderStatus>,
    /// Renderer map asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umap_path: Option<String>,
    /// Renderer sequence asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub useq_path: Option<String>,
    /// Renderer preset asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uconfig_path: Option<String>,
    /// Output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Output width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Output height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Output frame rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    /// Output format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Custom render start frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    /// Custom render end frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_frame: Option<i64>,
    /// Render progress; accepts fractional values from the bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Remaining-time estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_estimate: Option<String>,
    /// Current engine warmup frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_current: Option<u32>,
    /// Total engine warmup frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_total: Option<u32>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Retry counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Render start timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Terminal-outcome timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Generate a short 8-character job uid
pub fn short_uid() -> String {
    let mut s = uuid::Uuid::new_v4().simple().to_string();
    s.truncate(8);
    s
}

/// Local hostname, used as the default job owner and worker identity
pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn clamp_progress(p: f64) -> u8 {
    (p.trunc() as i64).clamp(0, 100) as u8
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

impl RenderJob {
    /// Build a full job from a partial document, filling construction
    /// defaults for anything missing or zero.
    pub fn from_partial(p: JobPatch) -> Self {
        let start_frame = p.start_frame.unwrap_or(0);
        let end_frame = p.end_frame.unwrap_or(0);
        Self {
            uid: non_empty(p.uid).unwrap_or_else(short_uid),
            name: p.name.unwrap_or_default(),
            owner: non_empty(p.owner).unwrap_or_else(local_hostname),
            worker: p.worker.unwrap_or_default(),
            time_created: non_empty(p.time_created)
                .unwrap_or_else(|| Local::now().format("%m/%d/%Y, %H:%M:%S").to_string()),
            priority: p.priority.unwrap_or(0).min(100),
            category: p.category.unwrap_or_default(),
            tags: p.tags.unwrap_or_default(),
            status: p.status.unwrap_or(RenderStatus::Unassigned),
            umap_path: p.umap_path.unwrap_or_default(),
            useq_path: p.useq_path.unwrap_or_default(),
            uconfig_path: p.uconfig_path.unwrap_or_default(),
            output_path: p.output_path.unwrap_or_default(),
            width: p.width.filter(|w| *w != 0).unwrap_or(1280),
            height: p.height.filter(|h| *h != 0).unwrap_or(720),
            frame_rate: p.frame_rate.filter(|f| *f != 0).unwrap_or(30),
            format: non_empty(p.format).unwrap_or_else(|| "JPG".to_string()),
            start_frame,
            end_frame,
            length: end_frame - start_frame,
            time_estimate: p.time_estimate.unwrap_or_default(),
            progress: p.progress.map(clamp_progress).unwrap_or(0),
            warmup_current: p.warmup_current.unwrap_or(0),
            warmup_total: p.warmup_total.unwrap_or(0),
            error_message: p.error_message.unwrap_or_default(),
            retry_count: p.retry_count.unwrap_or(0),
            started_at: p.started_at.unwrap_or_default(),
            completed_at: p.completed_at.unwrap_or_default(),
        }
    }

    /// Apply the mutable subset of a patch: progress, status, time
    /// estimate, warmup counters, error message, and lifecycle
    /// timestamps. Everything else is immutable after creation.
    pub fn apply(&mut self, p: &JobPatch) {
        if let Some(progress) = p.progress {
            self.progress = clamp_progress(progress);
        }
        if let Some(status) = p.status {
            self.status = status;
        }
        if let Some(ref time_estimate) = p.time_estimate {
            self.time_estimate = time_estimate.clone();
        }
        if let Some(warmup_current) = p.warmup_current {
            self.warmup_current = warmup_current;
        }
        if let Some(warmup_total) = p.warmup_total {
            self.warmup_total = warmup_total;
        }
        if let Some(ref error_message) = p.error_message {
            self.error_message = error_message.clone();
        }
        if let Some(ref started_at) = p.started_at {
            self.started_at = started_at.clone();
        }
        if let Some(ref completed_at) = p.completed_at {
            self.completed_at = completed_at.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_defaults() {
        let job = RenderJob::from_partial(JobPatch {
            name: Some("shot_010".to_string()),
            umap_path: Some("/Game/Maps/TestMap".to_string()),
            ..Default::default()
        });

        assert_eq!(job.uid.len(), 8);
        assert_eq!(job.name, "shot_010");
        assert_eq!(job.status, RenderStatus::Unassigned);
        assert_eq!(job.worker, "");
        assert_eq!(job.width, 1280);
        assert_eq!(job.height, 720);
        assert_eq!(job.frame_rate, 30);
        assert_eq!(job.format, "JPG");
        assert_eq!(job.retry_count, 0);
        assert!(job.tags.is_empty());
        assert!(!job.owner.is_empty());
        assert!(!job.time_created.is_empty());
    }

    #[test]
    fn test_length_derived_at_creation_only() {
        let mut job = RenderJob::from_partial(JobPatch {
            start_frame: Some(10),
            end_frame: Some(250),
            ..Default::default()
        });
        assert_eq!(job.length, 240);

        // Updates never re-derive length.
        job.apply(&JobPatch {
            progress: Some(50.0),
            ..Default::default()
        });
        assert_eq!(job.length, 240);
    }

    #[test]
    fn test_apply_touches_only_provided_fields() {
        let mut job = RenderJob::from_partial(JobPatch {
            name: Some("keep".to_string()),
            status: Some(RenderStatus::InProgress),
            ..Default::default()
        });
        let uid = job.uid.clone();

        job.apply(&JobPatch {
            progress: Some(42.9),
            time_estimate: Some("0h:3m:12s".to_string()),
            ..Default::default()
        });

        assert_eq!(job.uid, uid);
        assert_eq!(job.name, "keep");
        assert_eq!(job.status, RenderStatus::InProgress);
        assert_eq!(job.progress, 42);
        assert_eq!(job.time_estimate, "0h:3m:12s");
    }

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(RenderStatus::Unassigned.as_str(), "un-assigned");
        assert_eq!(RenderStatus::ReadyToStart.as_str(), "ready to start");
        assert_eq!(RenderStatus::InProgress.as_str(), "in progress");

        for status in RenderStatus::ALL {
            assert_eq!(RenderStatus::from_wire(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(RenderStatus::from_wire("bogus_status"), None);
    }

    #[test]
    fn test_job_round_trip() {
        let job = RenderJob::from_partial(JobPatch {
            name: Some("roundtrip".to_string()),
            umap_path: Some("/Game/Maps/X".to_string()),
            useq_path: Some("/Game/Sequences/Y".to_string()),
            tags: Some(vec!["a".to_string(), "b".to_string()]),
            priority: Some(42),
            start_frame: Some(1),
            end_frame: Some(100),
            ..Default::default()
        });

        let json = serde_json::to_string(&job).unwrap();
        let back: RenderJob = serde_json::from_str(&json).unwrap();
        assert_eq!(job, back);
    }

    #[test]
    fn test_progress_clamped() {
        let job = RenderJob::from_partial(JobPatch {
            progress: Some(250.0),
            ..Default::default()
        });
        assert_eq!(job.progress, 100);
    }
}
