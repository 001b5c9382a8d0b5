// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Renderer subprocess supervision.
//!
//! One supervisor owns the child process and polls it every 2 s for
//! natural exit, render timeout, and cancellation; drain tasks tail
//! stdout/stderr through include/exclude filters. Cancellation is
//! eventual: the API flips the job status, and the next poll here
//! terminates the child with a grace window before a hard kill.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::api::models::HeartbeatRequest;
use crate::client::FarmClient;
use crate::jobs::{RenderJob, RenderStatus};
use crate::store::WorkerState;
use crate::worker::metrics::MetricsSampler;
use crate::worker::AgentConfig;

/// How often the supervisor polls the child and the job status
pub const CHILD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Grace window after a timeout-triggered terminate
const TIMEOUT_KILL_GRACE: Duration = Duration::from_secs(10);

/// Grace window after a cancellation-triggered terminate
const CANCEL_KILL_GRACE: Duration = Duration::from_secs(5);

/// Lines worth forwarding from the renderer's output
const INCLUDE_PATTERNS: &[&str] = &[
    r"=== FarmExecutor",
    r"HTTP PUT",
    r"SERVER_API_URL",
    r"Progress:.*%",
    r"Render finished",
    r"LogPython: Error",
    r"LogPython: Warning",
    r"Pipeline initialized",
    r"FATAL:",
];

/// Noise to drop even when an include pattern matches
const EXCLUDE_PATTERNS: &[&str] = &[r"Subsystem not found", r"BeginDestroy", r"Destructor"];

/// Terminal result of one render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Whether the renderer exited cleanly
    pub success: bool,
    /// Failure description when `success` is false
    pub error: Option<String>,
}

impl RenderOutcome {
    /// Clean exit
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed render with a human-readable reason
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

pub(crate) struct OutputFilter {
    include: Regex,
    exclude: Regex,
}

impl OutputFilter {
    pub(crate) fn shared() -> &'static OutputFilter {
        static FILTER: OnceLock<OutputFilter> = OnceLock::new();
        FILTER.get_or_init(|| OutputFilter {
            include: Regex::new(&INCLUDE_PATTERNS.join("|")).expect("static include pattern"),
            exclude: Regex::new(&EXCLUDE_PATTERNS.join("|")).expect("static exclude pattern"),
        })
    }

    pub(crate) fn matches(&self, line: &str) -> bool {
        self.include.is_match(line) && !self.exclude.is_match(line)
    }
}

/// Argv for the renderer, built from the job's asset paths. The job
/// uid rides along so the in-renderer bridge can address its own
/// status updates.
pub(crate) fn renderer_args(config: &AgentConfig, job: &RenderJob) -> Vec<String> {
    vec![
        config.unreal_project.clone(),
        job.umap_path.clone(),
        format!("-JobId={}", job.uid),
        format!("-LevelSequence={}", job.useq_path),
        format!("-MoviePipelineConfig={}", job.uconfig_path),
        "-game".to_string(),
        "-MoviePipelineLocalExecutorClass=/Script/MovieRenderPipelineCore.MoviePipelinePythonHostExecutor"
            .to_string(),
        "-ExecutorPythonClass=/Engine/PythonTypes.FarmExecutor".to_string(),
        "-windowed".to_string(),
        format!("-resX={}", job.width),
        format!("-resY={}", job.height),
        "-StdOut".to_string(),
        "-FullStdOutLogOutput".to_string(),
    ]
}

fn spawn_drain<R>(reader: R, filter: &'static OutputFilter) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if filter.matches(&line) {
                info!("[UE] {line}");
            }
        }
    })
}

#[allow(unsafe_code)]
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!("failed to kill renderer: {e}");
    }
}

/// Launch the renderer for `job` and supervise it to a terminal
/// outcome: natural exit, render timeout, or cancellation.
pub(crate) async fn run_render(
    config: &AgentConfig,
    client: &FarmClient,
    metrics: &Mutex<MetricsSampler>,
    job: &RenderJob,
) -> RenderOutcome {
    let args = renderer_args(config, job);
    info!(exe = %config.unreal_exe, "launching renderer: {}", args.join(" "));

    let mut child = match Command::new(&config.unreal_exe)
        .args(&args)
        .env("UE_PYTHONPATH", &config.bridge_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let message = format!("Failed to start Unreal: {e}");
            error!("{message}");
            return RenderOutcome::fail(message);
        }
    };

    let filter = OutputFilter::shared();
    let mut drains = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        drains.push(spawn_drain(stdout, filter));
    }
    if let Some(stderr) = child.stderr.take() {
        drains.push(spawn_drain(stderr, filter));
    }

    let started = Instant::now();
    let render_started = Utc::now().to_rfc3339();

    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(-1);
                if code != 0 {
                    let message = format!("Unreal exited with code {code}");
                    error!(uid = %job.uid, "{message}");
                    break RenderOutcome::fail(message);
                }
                break RenderOutcome::ok();
            }
            Ok(None) => {}
            Err(e) => {
                terminate(&mut child, CANCEL_KILL_GRACE).await;
                break RenderOutcome::fail(format!("Failed to poll renderer: {e}"));
            }
        }

        if started.elapsed() > config.render_timeout {
            let secs = config.render_timeout.as_secs();
            error!(uid = %job.uid, "render timed out after {secs}s");
            terminate(&mut child, TIMEOUT_KILL_GRACE).await;
            break RenderOutcome::fail(format!("Render timed out after {secs} seconds"));
        }

        if let Some(current) = client.job(&job.uid).await {
            if current.status == RenderStatus::Cancelled {
                info!(uid = %job.uid, "job cancelled, killing render process");
                terminate(&mut child, CANCEL_KILL_GRACE).await;
                break RenderOutcome::fail("Cancelled by user");
            }
        }

        let sampled = { metrics.lock().sample() };
        client
            .heartbeat(&HeartbeatRequest {
                worker_name: Some(config.worker_name.clone()),
                status: Some(WorkerState::Rendering),
                current_job: Some(job.uid.clone()),
                cpu_percent: Some(sampled.cpu_percent),
                memory_percent: Some(sampled.memory_percent),
                unreal_pid: child.id(),
                render_started: Some(render_started.clone()),
            })
            .await;

        tokio::time::sleep(CHILD_POLL_INTERVAL).await;
    };

    // Let the drain tasks flush trailing output, then move on.
    for drain in drains {
        let _ = tokio::time::timeout(Duration::from_secs(2), drain).await;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobPatch;
    use std::path::PathBuf;

    fn test_config() -> AgentConfig {
        AgentConfig {
            worker_name: "test-node".to_string(),
            server_url: "http://127.0.0.1:5000".to_string(),
            unreal_exe: "/opt/unreal/UnrealEditor".to_string(),
            unreal_project: "/projects/farm.uproject".to_string(),
            bridge_dir: PathBuf::from("/opt/farm/bridge"),
            poll_interval: Duration::from_secs(10),
            render_timeout: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_renderer_args_inject_job_uid() {
        let job = RenderJob::from_partial(JobPatch {
            umap_path: Some("/Game/Maps/X".to_string()),
            useq_path: Some("/Game/Sequences/Y".to_string()),
            uconfig_path: Some("/Game/Presets/Z".to_string()),
            ..Default::default()
        });
        let args = renderer_args(&test_config(), &job);

        assert_eq!(args[0], "/projects/farm.uproject");
        assert_eq!(args[1], "/Game/Maps/X");
        assert!(args.contains(&format!("-JobId={}", job.uid)));
        assert!(args.contains(&"-LevelSequence=/Game/Sequences/Y".to_string()));
        assert!(args.contains(&"-game".to_string()));
        assert!(args.contains(&"-resX=1280".to_string()));
        assert!(args.contains(&"-resY=720".to_string()));
    }

    #[test]
    fn test_output_filter() {
        let filter = OutputFilter::shared();
        assert!(filter.matches("LogPython: Progress: 45.2% ETA: 0h:3m:12s"));
        assert!(filter.matches("FATAL: preset not found"));
        assert!(filter.matches("Pipeline initialized, rendering..."));
        assert!(!filter.matches("LogTemp: verbose engine chatter"));
        // Excluded noise loses even against an include match.
        assert!(!filter.matches("Progress: 10% BeginDestroy"));
    }
}
