// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Project submission binary.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process;

use render_farm_core::client::FarmClient;
use render_farm_core::config::ConfigLoader;
use render_farm_core::submit::{submit_project, ProjectConfig};

/// Submit every sequence of a project config as render jobs
#[derive(Parser)]
#[command(name = "renderfarm-submit")]
#[command(version)]
#[command(about = "Submit render jobs from a project config file", long_about = None)]
struct Args {
    /// Path to the project config JSON file
    project_config: PathBuf,

    /// Coordinator base URL
    #[arg(long, env = "RENDER_SERVER_URL")]
    server_url: Option<String>,
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
    let settings = ConfigLoader::new().load()?;
    let server_url = args.server_url.unwrap_or(settings.server.url);

    let project = ProjectConfig::load(&args.project_config)
        .with_context(|| format!("cannot load {}", args.project_config.display()))?;
    let client = FarmClient::new(&server_url)?;

    let submitted = submit_project(&client, &project).await;
    anyhow::ensure!(
        submitted.len() == project.sequences.len(),
        "submitted only {} of {} jobs",
        submitted.len(),
        project.sequences.len()
    );
    Ok(())
}
