//! scrimd
//!
//! Scrim signup and notification scheduler.
//!
//! This service:
//! - Opens scrims at a clock time in a labeled timezone
//! - Tracks a capped main roster and reserve roster per scrim
//! - Notifies the main roster at start and the reserve roster shortly after
//! - Persists every change so a restart picks up where it left off
//! - Rotates a presence status line from a local file

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scrimd::config::Config;
use scrimd::notify::{LogListener, LogNotifier, LogPresence};
use scrimd::{presence, Coordinator, Dispatcher, ScrimStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SCRIMD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting scrimd");
    info!(
        state_file = %config.state_file.display(),
        main_limit = config.limits.main,
        reserve_limit = config.limits.reserve,
        reserve_delay_secs = config.reserve_delay.as_secs(),
        zone_count = config.zones.len(),
        "Configuration loaded"
    );

    // An unreadable state file must not keep the scheduler down.
    let store = match ScrimStore::open(config.state_file.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "State file unreadable, starting with an empty table");
            Arc::new(ScrimStore::empty(config.state_file.clone()))
        }
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(LogNotifier), config.delivery));
    let coordinator = Coordinator::new(
        config.clone(),
        Arc::clone(&store),
        dispatcher,
        Arc::new(LogListener),
        shutdown_rx.clone(),
    );

    let restored = coordinator.restore().await;
    info!(restored, "Scrim recovery complete");

    // Start the presence rotation
    let presence_handle = tokio::spawn(presence::run_presence_loop(
        config.presence_file.clone(),
        config.presence_interval,
        Arc::new(LogPresence),
        shutdown_rx.clone(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = presence_handle => {
            info!("Presence loop exited");
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Give workers time to finish what they are on
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(Duration::from_secs(2)).await;

    if let Err(e) = store.save_all().await {
        error!(error = %e, "Final state write failed");
    }

    info!("scrimd shutdown complete");
    Ok(())
}
