//! # stageform
//!
//! Server binary: loads settings, installs logging and serves `/on` until
//! Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stageform_core::ProfileTransform;
use stageform_server::settings::{load_settings_from_path, validate};
use stageform_server::{ServerConfig, Supervisor};
use stageform_telemetry::{init_telemetry, TelemetryConfig};

/// Staged-session WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "stageform", about = "Staged-session WebSocket server")]
struct Cli {
    /// JSON settings file merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent sessions.
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if self.log_json {
            config.log_json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        load_settings_from_path(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut config);
    validate(&config).context("Invalid configuration")?;

    init_telemetry(&TelemetryConfig::with_level_str(&config.log_level, config.log_json))
        .context("Failed to initialize logging")?;

    let supervisor = Supervisor::from_config(&config, Arc::new(ProfileTransform));
    let handle = stageform_server::start(&config, supervisor)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

    tracing::info!(
        port = handle.port(),
        max_sessions = config.max_sessions,
        "stageform ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    if !handle.shutdown(config.shutdown_timeout()).await {
        tracing::warn!("some sessions did not finish before the shutdown timeout");
    }
    Ok(())
}
