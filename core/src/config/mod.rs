//! Configuration management.
//!
//! Settings are loaded with the following precedence:
//! 1. CLI arguments (applied by the binaries, highest priority)
//! 2. Environment variables (the flat names below)
//! 3. Config file (`~/.config/render-farm/config.toml` or a custom path)
//! 4. Defaults (lowest priority)
//!
//! The environment layer uses the farm's flat variable names:
//! `RENDER_SERVER_URL`, `RENDER_SERVER_HOST`, `RENDER_SERVER_PORT`,
//! `WORKER_TIMEOUT`, `JOB_TIMEOUT`, `RENDER_TIMEOUT`,
//! `POLL_INTERVAL`, `WORKER_NAME`, `UNREAL_EXE`, `UNREAL_PROJECT`.

pub mod models;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, File};
use serde_valid::Validate;
use std::env;
use std::path::{Path, PathBuf};

pub use models::{FarmSettings, ServerSettings, Settings, WorkerSettings};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name
const CONFIG_DIR_NAME: &str = "render-farm";

/// Configuration loader with builder pattern
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Optional custom configuration file path
    custom_file: Option<PathBuf>,
    /// Whether to skip loading from the default config file
    skip_default_file: bool,
    /// Whether to skip the environment variable layer
    skip_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify a custom configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip loading from the default configuration file
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skip loading from environment variables
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load the configuration from all sources
    pub fn load(&self) -> Result<Settings> {
        let mut builder =
            ConfigBuilder::builder().add_source(config::Config::try_from(&Settings::default())?);

        if !self.skip_default_file {
            if let Some(config_path) = self.find_config_file() {
                tracing::debug!("loading config from: {}", config_path.display());
                builder = builder.add_source(
                    File::from(config_path)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        if let Some(ref custom_path) = self.custom_file {
            tracing::info!("loading custom config from: {}", custom_path.display());
            builder = builder.add_source(
                File::from(custom_path.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        let mut settings: Settings = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        if !self.skip_env {
            apply_env(&mut settings)?;
        }

        settings
            .validate()
            .map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;

        Ok(settings)
    }

    /// Find the default configuration file, preferring the platform
    /// config directory over the working directory.
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// The platform-specific path where the config file is expected
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

/// Apply the flat environment variables over `settings`
fn apply_env(settings: &mut Settings) -> Result<()> {
    if let Ok(v) = env::var("RENDER_SERVER_URL") {
        settings.server.url = v;
    }
    if let Ok(v) = env::var("RENDER_SERVER_HOST") {
        settings.server.host = v;
    }
    if let Ok(v) = env::var("RENDER_SERVER_PORT") {
        settings.server.port = v.parse().context("invalid RENDER_SERVER_PORT")?;
    }
    if let Ok(v) = env::var("WORKER_TIMEOUT") {
        settings.farm.worker_timeout_secs = v.parse().context("invalid WORKER_TIMEOUT")?;
    }
    if let Ok(v) = env::var("JOB_TIMEOUT") {
        settings.farm.job_timeout_secs = v.parse().context("invalid JOB_TIMEOUT")?;
    }
    if let Ok(v) = env::var("RENDER_TIMEOUT") {
        settings.worker.render_timeout_secs = v.parse().context("invalid RENDER_TIMEOUT")?;
    }
    if let Ok(v) = env::var("POLL_INTERVAL") {
        settings.worker.poll_interval_secs = v.parse().context("invalid POLL_INTERVAL")?;
    }
    if let Ok(v) = env::var("WORKER_NAME") {
        settings.worker.name = v;
    }
    if let Ok(v) = env::var("UNREAL_EXE") {
        settings.worker.unreal_exe = v;
    }
    if let Ok(v) = env::var("UNREAL_PROJECT") {
        settings.worker.unreal_project = v;
    }
    Ok(())
}
