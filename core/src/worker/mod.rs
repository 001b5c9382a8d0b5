// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker agent.
//!
//! A long-running process on each render host: heartbeats the
//! coordinator, pulls the jobs assigned to itself, drives the
//! renderer subprocess through its lifecycle, and reports terminal
//! outcomes. Jobs are processed strictly one at a time.

pub mod metrics;
pub mod render;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::api::models::HeartbeatRequest;
use crate::client::{ClientError, FarmClient};
use crate::config::Settings;
use crate::jobs::{JobPatch, RenderJob, RenderStatus};

pub use metrics::{MetricsSampler, SystemMetrics};
pub use render::RenderOutcome;

/// Backoff after an unexpected agent error, longer than the normal
/// poll so a persistent failure cannot spin the loop
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Agent configuration errors
#[derive(Debug, Error)]
pub enum AgentConfigError {
    /// The renderer executable is not configured
    #[error("UNREAL_EXE is not set")]
    MissingRendererExe,

    /// The renderer project is not configured
    #[error("UNREAL_PROJECT is not set")]
    MissingRendererProject,
}

/// Worker agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Worker identity reported in heartbeats
    pub worker_name: String,
    /// Coordinator base URL
    pub server_url: String,
    /// Path to the renderer executable
    pub unreal_exe: String,
    /// Path to the renderer project
    pub unreal_project: String,
    /// Directory holding the in-renderer bridge module
    pub bridge_dir: PathBuf,
    /// Main-loop period
    pub poll_interval: Duration,
    /// How long a render may run before the worker kills it
    pub render_timeout: Duration,
}

impl AgentConfig {
    /// Build an agent config from settings, refusing to start without
    /// a renderer executable and project.
    pub fn from_settings(settings: &Settings) -> Result<Self, AgentConfigError> {
        if settings.worker.unreal_exe.is_empty() {
            return Err(AgentConfigError::MissingRendererExe);
        }
        if settings.worker.unreal_project.is_empty() {
            return Err(AgentConfigError::MissingRendererProject);
        }
        Ok(Self {
            worker_name: settings.worker.name.clone(),
            server_url: settings.server.url.clone(),
            unreal_exe: settings.worker.unreal_exe.clone(),
            unreal_project: settings.worker.unreal_project.clone(),
            bridge_dir: settings.worker.bridge_dir.clone(),
            poll_interval: Duration::from_secs(settings.worker.poll_interval_secs),
            render_timeout: Duration::from_secs(settings.worker.render_timeout_secs),
        })
    }
}

/// The seam between the agent loop and the renderer process, so the
/// loop can be exercised without launching a real renderer.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Drive one render to a terminal outcome
    async fn render(&self, job: &RenderJob) -> RenderOutcome;
}

/// The real renderer: spawns the external process and supervises it
pub struct UnrealRenderer {
    config: AgentConfig,
    client: FarmClient,
    metrics: Mutex<MetricsSampler>,
}

impl UnrealRenderer {
    /// Create a renderer for `config`
    pub fn new(config: AgentConfig, client: FarmClient) -> Self {
        Self {
            config,
            client,
            metrics: Mutex::new(MetricsSampler::new()),
        }
    }
}

#[async_trait]
impl Renderer for UnrealRenderer {
    async fn render(&self, job: &RenderJob) -> RenderOutcome {
        render::run_render(&self.config, &self.client, &self.metrics, job).await
    }
}

/// The worker agent main loop
pub struct WorkerAgent {
    config: AgentConfig,
    client: FarmClient,
    renderer: Arc<dyn Renderer>,
    metrics: Mutex<MetricsSampler>,
    connected: bool,
    ever_connected: bool,
}

impl WorkerAgent {
    /// Create an agent with the real renderer
    pub fn new(config: AgentConfig) -> Result<Self, ClientError> {
        let client = FarmClient::new(&config.server_url)?;
        let renderer = Arc::new(UnrealRenderer::new(config.clone(), client.clone()));
        Ok(Self {
            config,
            client,
            renderer,
            metrics: Mutex::new(MetricsSampler::new()),
            connected: false,
            ever_connected: false,
        })
    }

    /// Swap the renderer implementation (tests use a stub)
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Run the agent loop forever
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("starting render worker: {}", self.config.worker_name);
        info!("renderer: {}", self.config.unreal_exe);
        info!("project: {}", self.config.unreal_project);
        info!("render timeout: {}s", self.config.render_timeout.as_secs());

        loop {
            if let Err(e) = self.poll_once().await {
                error!("worker error: {e:#}");
                self.client
                    .report_error(
                        &self.config.worker_name,
                        &format!("Worker error: {e}"),
                        None,
                    )
                    .await;
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One loop iteration: heartbeat, pull assignments, process at
    /// most one ready job.
    pub async fn poll_once(&mut self) -> anyhow::Result<()> {
        let sampled = { self.metrics.lock().sample() };
        self.client
            .heartbeat(&HeartbeatRequest::idle(
                &self.config.worker_name,
                sampled.cpu_percent,
                sampled.memory_percent,
            ))
            .await;

        match self.client.my_jobs(&self.config.worker_name).await {
            // A failed call means "no jobs available"; log the edge
            // from connected to disconnected, not every miss.
            None => {
                if self.connected {
                    warn!("lost connection to server, will keep retrying");
                    self.connected = false;
                }
            }
            Some(jobs) => {
                if !self.connected {
                    if self.ever_connected {
                        info!("reconnected to server at {}", self.config.server_url);
                    } else {
                        info!("connected to server at {}", self.config.server_url);
                        self.ever_connected = true;
                    }
                    self.connected = true;
                }

                let ready = jobs
                    .into_iter()
                    .find(|j| j.status == RenderStatus::ReadyToStart);
                if let Some(job) = ready {
                    self.process_job(&job).await;
                }
            }
        }
        Ok(())
    }

    async fn process_job(&self, job: &RenderJob) {
        info!(uid = %job.uid, name = %job.name, "starting job");

        self.client
            .update_job(
                &job.uid,
                &JobPatch {
                    status: Some(RenderStatus::InProgress),
                    started_at: Some(Utc::now().to_rfc3339()),
                    ..Default::default()
                },
            )
            .await;

        let outcome = self.renderer.render(job).await;
        let completed_at = Utc::now().to_rfc3339();

        if outcome.success {
            info!(uid = %job.uid, "finished job");
            self.client
                .update_job(
                    &job.uid,
                    &JobPatch {
                        progress: Some(100.0),
                        status: Some(RenderStatus::Finished),
                        time_estimate: Some("N/A".to_string()),
                        completed_at: Some(completed_at),
                        ..Default::default()
                    },
                )
                .await;
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "Render failed (unknown reason)".to_string());
            error!(uid = %job.uid, %message, "job failed");
            self.client
                .update_job(
                    &job.uid,
                    &JobPatch {
                        status: Some(RenderStatus::Errored),
                        error_message: Some(message.clone()),
                        completed_at: Some(completed_at),
                        ..Default::default()
                    },
                )
                .await;
            self.client
                .report_error(&self.config.worker_name, &message, Some(&job.uid))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_requires_renderer() {
        let mut settings = Settings::default();
        settings.worker.unreal_exe.clear();
        assert!(matches!(
            AgentConfig::from_settings(&settings),
            Err(AgentConfigError::MissingRendererExe)
        ));

        settings.worker.unreal_exe = "/opt/unreal/UnrealEditor".to_string();
        settings.worker.unreal_project.clear();
        assert!(matches!(
            AgentConfig::from_settings(&settings),
            Err(AgentConfigError::MissingRendererProject)
        ));

        settings.worker.unreal_project = "/projects/farm.uproject".to_string();
        let config = AgentConfig::from_settings(&settings).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.render_timeout, Duration::from_secs(3600));
    }
}
