// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Coordinator service binary.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use render_farm_core::api::{self, AppState, RateLimits};
use render_farm_core::config::ConfigLoader;
use render_farm_core::coordinator::{Coordinator, WATCHDOG_INTERVAL};
use render_farm_core::store::FarmStore;

/// Render farm coordinator: accepts job submissions, tracks workers,
/// dispatches jobs, and re-queues stuck ones
#[derive(Parser)]
#[command(name = "renderfarm-coordinator")]
#[command(version)]
#[command(about = "Render farm coordinator service", long_about = None)]
struct Args {
    /// Bind host
    #[arg(long, env = "RENDER_SERVER_HOST")]
    host: Option<String>,

    /// Bind port
    #[arg(long, env = "RENDER_SERVER_PORT")]
    port: Option<u16>,

    /// Data directory for the embedded document store
    #[arg(long, env = "RENDER_SERVER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory of project config files for /api/submit
    #[arg(long)]
    projects_dir: Option<PathBuf>,

    /// Path to a TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable per-source rate limiting
    #[arg(long)]
    no_rate_limit: bool,
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

    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        settings.server.data_dir = data_dir;
    }
    if let Some(projects_dir) = args.projects_dir {
        settings.server.projects_dir = projects_dir;
    }
    if args.no_rate_limit {
        settings.server.rate_limiting = false;
    }

    let store = Arc::new(
        FarmStore::open(&settings.server.data_dir).context("failed to open document store")?,
    );
    let coordinator = Arc::new(Coordinator::new(
        store,
        Duration::from_secs(settings.farm.worker_timeout_secs),
        Duration::from_secs(settings.farm.job_timeout_secs),
    ));

    let watchdog = Arc::clone(&coordinator).spawn_watchdog(WATCHDOG_INTERVAL);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid bind address")?;
    let limits = settings.server.rate_limiting.then(RateLimits::default);
    if limits.is_none() {
        warn!("rate limiting disabled");
    }

    let state = AppState {
        coordinator: Arc::clone(&coordinator),
        projects_dir: settings.server.projects_dir.clone(),
    };

    api::serve(addr, state, limits, shutdown_signal()).await?;

    info!("shutting down");
    coordinator.stop_watchdog();
    watchdog.await.ok();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for shutdown signal");
    }
}
