//! choreo-server binary entry point.
//!
//! Usage:
//! ```bash
//! choreo-server --deployment deployment.toml --config choreo.toml
//! choreo-server --help
//! ```

use anyhow::{Context, Result};
use choreo_core::{verify_or_err, Deployment};
use choreo_server::{Coordinator, ServerConfig, ServerHandle};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Coordination server for a choreographed run.
#[derive(Parser, Debug)]
#[command(name = "choreo-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Deployment declaration (TOML)
    #[arg(long, short)]
    deployment: PathBuf,

    /// Server configuration file; defaults apply when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the bind address from the configuration
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    let deployment = Deployment::from_file(&cli.deployment)
        .with_context(|| format!("loading deployment {}", cli.deployment.display()))?;
    verify_or_err(&deployment)?;

    tracing::info!(
        deployment = %deployment.name,
        steps = deployment.run_sequence.len(),
        sequence = %deployment.run_sequence,
        "deployment verified"
    );

    let coordinator = Arc::new(Coordinator::from_deployment(&deployment));
    let handle = ServerHandle::start(&config, coordinator.clone()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    let status = coordinator.status();
    tracing::info!(
        cursor = status.cursor,
        completed = status.completed,
        "shutting down"
    );
    handle.shutdown().await?;
    Ok(())
}
