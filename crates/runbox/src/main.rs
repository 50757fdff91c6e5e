//! # runbox
//!
//! runbox server binary: loads settings, wires the build pipeline into the
//! `WebSocket` server and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use runbox_logging::LogFormat;
use runbox_pipeline::{LineDiagnosticParser, ProcessPipeline, RunService};
use runbox_server::{RunboxServer, ServerConfig};
use runbox_settings::RunboxSettings;
use tracing::{info, warn};

/// runbox compile-and-run server.
#[derive(Parser, Debug)]
#[command(name = "runbox", about = "Compile-and-run WebSocket server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.runbox/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, mut settings: RunboxSettings) -> RunboxSettings {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(runbox_settings::settings_path);
    let settings = runbox_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    let settings = args.apply(settings);

    runbox_logging::init_subscriber(
        &settings.logging.level,
        LogFormat::from_str_lossy(&settings.logging.format),
    );
    info!(path = %settings_path.display(), "settings loaded");

    let metrics = runbox_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let pipeline = ProcessPipeline::from_settings(&settings.pipeline);
    let toolchains: Vec<_> = pipeline.toolchain_names().map(str::to_owned).collect();
    info!(?toolchains, timeout_ms = settings.pipeline.timeout_ms, "build pipeline ready");
    let runner = RunService::new(Arc::new(pipeline), Arc::new(LineDiagnosticParser::new()));

    let server = RunboxServer::new(ServerConfig::from_settings(&settings.server), runner)
        .with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("runbox listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if !server.shutdown_gracefully().await {
        warn!("some sessions did not close before the shutdown timeout");
    }
    let _ = handle.await;
    Ok(())
}
