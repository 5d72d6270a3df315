//! # Meridian-Chain Node
//!
//! Loads the configuration, initializes telemetry, starts the runtime and
//! waits for Ctrl+C.
//!
//! See [`node_runtime::config`] for the `MC_*` environment variables.

use anyhow::{Context, Result};
use meridian_telemetry::init_telemetry;
use node_runtime::{NodeConfig, NodeRuntime};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::load().context("Failed to load configuration")?;
    let _telemetry =
        init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  Meridian-Chain Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let runtime = NodeRuntime::new(config).context("Failed to build node")?;
    runtime.start().await.context("Failed to start node")?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    Ok(())
}
