//! Reflex hub daemon
//!
//! Boots the local reflex engine: loads configuration, opens the state
//! store, restores processors from persisted state, and runs the controller
//! until interrupted.

mod config;
mod uplink;

use std::sync::Arc;

use anyhow::Result;
use reflex_controller::Controller;
use reflex_driver::DriverCache;
use reflex_store::StateStore;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::HubConfig;
use crate::uplink::LoggingGateway;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "reflex.yaml".to_string());
    let config = HubConfig::load(&config_path)?;

    info!(database = %config.database_path.display(), "Starting reflex hub");

    let store = Arc::new(StateStore::open(&config.database_path)?);
    let cache = Arc::new(DriverCache::new());

    // TODO: wire the Zigbee/Z-Wave stacks and the cloud relay transport
    let gateway = Arc::new(LoggingGateway::new());

    let mut controller = Controller::new(
        config.controller_config(),
        store,
        cache,
        gateway,
        Vec::new(),
    );
    controller.restore();

    let handle = controller.spawn();
    info!("Reflex hub running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    handle.shutdown().await;

    Ok(())
}
