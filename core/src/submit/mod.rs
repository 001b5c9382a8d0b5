// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Project-config submission.
//!
//! A project config is a JSON file naming a map, a render preset, and
//! a list of sequences; each sequence becomes one job.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::client::FarmClient;
use crate::jobs::{JobPatch, RenderJob};

/// Submission errors
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The project config could not be read
    #[error("failed to read project config: {0}")]
    Io(#[from] std::io::Error),

    /// The project config is not valid JSON
    #[error("failed to parse project config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A project config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project label
    pub name: String,
    /// Renderer path to the map/level asset
    pub map: String,
    /// Renderer path to the preset/config asset
    pub config: String,
    /// Renderer paths of the sequences to render
    pub sequences: Vec<String>,
}

impl ProjectConfig {
    /// Load a project config from `path`
    pub fn load(path: &Path) -> Result<Self, SubmitError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// The partial job for one of this project's sequences
    pub fn job_patch_for(&self, sequence: &str) -> JobPatch {
        JobPatch {
            name: Some(sequence_job_name(sequence)),
            umap_path: Some(self.map.clone()),
            useq_path: Some(sequence.to_string()),
            uconfig_path: Some(self.config.clone()),
            ..Default::default()
        }
    }
}

/// Derive a job name from a sequence path: the last path component,
/// stripped of any asset suffix.
pub fn sequence_job_name(sequence: &str) -> String {
    sequence
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(sequence)
        .split('.')
        .next()
        .unwrap_or("")
        .to_string()
}

/// POST one job per sequence; returns the jobs the coordinator
/// stored. Failed submissions are skipped (the client already logged
/// them).
pub async fn submit_project(client: &FarmClient, project: &ProjectConfig) -> Vec<RenderJob> {
    info!("submitting project: {}", project.name);

    let mut submitted = Vec::with_capacity(project.sequences.len());
    for sequence in &project.sequences {
        if let Some(job) = client.post_job(&project.job_patch_for(sequence)).await {
            info!(uid = %job.uid, name = %job.name, "submitted job");
            submitted.push(job);
        }
    }

    info!("submitted {} jobs", submitted.len());
    submitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_job_name() {
        assert_eq!(sequence_job_name("/Game/Sequences/Shot010"), "Shot010");
        assert_eq!(
            sequence_job_name("/Game/Sequences/Shot010.Shot010"),
            "Shot010"
        );
        assert_eq!(sequence_job_name("/Game/Sequences/Shot010/"), "Shot010");
        assert_eq!(sequence_job_name("Shot010"), "Shot010");
    }

    #[test]
    fn test_job_patch_for_sequence() {
        let project = ProjectConfig {
            name: "demo".to_string(),
            map: "/Game/Maps/Main".to_string(),
            config: "/Game/Presets/Final".to_string(),
            sequences: vec!["/Game/Sequences/Shot010".to_string()],
        };

        let patch = project.job_patch_for(&project.sequences[0]);
        assert_eq!(patch.name.as_deref(), Some("Shot010"));
        assert_eq!(patch.umap_path.as_deref(), Some("/Game/Maps/Main"));
        assert_eq!(
            patch.useq_path.as_deref(),
            Some("/Game/Sequences/Shot010")
        );
        assert_eq!(patch.uconfig_path.as_deref(), Some("/Game/Presets/Final"));
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ProjectConfig::load(&path),
            Err(SubmitError::Parse(_))
        ));
    }
}
