//! Configuration models.

use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::path::PathBuf;

use crate::jobs::local_hostname;

/// Full settings tree: coordinator, farm policy, and worker agent
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Settings {
    /// Coordinator HTTP server settings
    #[serde(default)]
    #[validate]
    pub server: ServerSettings,
    /// Farm-wide liveness and stuck-job policy
    #[serde(default)]
    #[validate]
    pub farm: FarmSettings,
    /// Worker agent settings
    #[serde(default)]
    #[validate]
    pub worker: WorkerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            farm: FarmSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

/// Coordinator HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    #[validate(minimum = 1)]
    pub port: u16,
    /// Base URL workers and bridges use to reach the coordinator
    #[serde(default = "default_url")]
    pub url: String,
    /// Directory for the embedded document store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory of project config files for `/api/submit`
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    /// Whether per-source rate limiting is applied
    #[serde(default = "default_true")]
    pub rate_limiting: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            url: default_url(),
            data_dir: default_data_dir(),
            projects_dir: default_projects_dir(),
            rate_limiting: true,
        }
    }
}

/// Farm-wide liveness and stuck-job policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FarmSettings {
    /// Seconds of heartbeat silence before a worker counts as offline
    #[serde(default = "default_worker_timeout")]
    #[validate(minimum = 1)]
    pub worker_timeout_secs: u64,
    /// Seconds a running job may take before it is declared stuck
    #[serde(default = "default_job_timeout")]
    #[validate(minimum = 1)]
    pub job_timeout_secs: u64,
}

impl Default for FarmSettings {
    fn default() -> Self {
        Self {
            worker_timeout_secs: default_worker_timeout(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

/// Worker agent settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerSettings {
    /// Worker identity; the local hostname unless overridden
    #[serde(default = "local_hostname")]
    pub name: String,
    /// Main-loop period in seconds
    #[serde(default = "default_poll_interval")]
    #[validate(minimum = 1)]
    pub poll_interval_secs: u64,
    /// Seconds before the worker kills a running render
    #[serde(default = "default_render_timeout")]
    #[validate(minimum = 1)]
    pub render_timeout_secs: u64,
    /// Path to the renderer executable
    #[serde(default)]
    pub unreal_exe: String,
    /// Path to the renderer project
    #[serde(default)]
    pub unreal_project: String,
    /// Directory holding the in-renderer bridge module
    #[serde(default = "default_bridge_dir")]
    pub bridge_dir: PathBuf,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: local_hostname(),
            poll_interval_secs: default_poll_interval(),
            render_timeout_secs: default_render_timeout(),
            unreal_exe: String::new(),
            unreal_project: String::new(),
            bridge_dir: default_bridge_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("database")
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

fn default_true() -> bool {
    true
}

fn default_worker_timeout() -> u64 {
    30
}

fn default_job_timeout() -> u64 {
    1800
}

fn default_poll_interval() -> u64 {
    10
}

fn default_render_timeout() -> u64 {
    3600
}

fn default_bridge_dir() -> PathBuf {
    PathBuf::from("bridge")
}
