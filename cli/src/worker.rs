// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker agent binary.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::info;

use render_farm_core::config::ConfigLoader;
use render_farm_core::worker::{AgentConfig, WorkerAgent};

/// Render farm worker: heartbeats the coordinator, pulls assigned
/// jobs, and drives the renderer process
#[derive(Parser)]
#[command(name = "renderfarm-worker")]
#[command(version)]
#[command(about = "Render farm worker agent", long_about = None)]
struct Args {
    /// Coordinator base URL
    #[arg(long, env = "RENDER_SERVER_URL")]
    server_url: Option<String>,

    /// Worker identity (defaults to the hostname)
    #[arg(long, env = "WORKER_NAME")]
    name: Option<String>,

    /// Path to the renderer executable
    #[arg(long, env = "UNREAL_EXE")]
    unreal_exe: Option<String>,

    /// Path to the renderer project
    #[arg(long, env = "UNREAL_PROJECT")]
    unreal_project: Option<String>,

    /// Main-loop period in seconds
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Path to a TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(config) = args.config {
        loader = loader.with_file(config);
    }
    let mut settings = loader.load()?;

    if let Some(server_url) = args.server_url {
        settings.server.url = server_url;
    }
    if let Some(name) = args.name {
        settings.worker.name = name;
    }
    if let Some(unreal_exe) = args.unreal_exe {
        settings.worker.unreal_exe = unreal_exe;
    }
    if let Some(unreal_project) = args.unreal_project {
        settings.worker.unreal_project = unreal_project;
    }
    if let Some(poll_interval) = args.poll_interval {
        settings.worker.poll_interval_secs = poll_interval;
    }

    let config = AgentConfig::from_settings(&settings)?;
    let agent = WorkerAgent::new(config)?;

    tokio::select! {
        result = agent.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down worker");
            Ok(())
        }
    }
}
