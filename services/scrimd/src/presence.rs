//! Presence rotation.
//!
//! Every interval, pick a random status line from a JSON file and push it to
//! the sink. The file is re-read on each tick, so edits show up on the next
//! rotation without a restart; an unreadable or empty file skips the tick
//! and the loop carries on.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::notify::PresenceSink;

/// Run the rotation loop until shutdown.
pub async fn run_presence_loop(
    path: impl AsRef<Path>,
    interval: Duration,
    sink: Arc<dyn PresenceSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let path = path.as_ref().to_path_buf();
    debug!(path = %path.display(), interval_secs = interval.as_secs(), "Presence loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Presence loop shutting down");
                    return;
                }
            }
            _ = ticker.tick() => {
                rotate_once(&path, sink.as_ref()).await;
            }
        }
    }
}

async fn rotate_once(path: &Path, sink: &dyn PresenceSink) {
    let statuses = match read_statuses(path) {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Presence file unreadable, skipping rotation");
            return;
        }
    };

    // The rng is a thread-local handle; keep it out of scope before awaiting.
    let chosen = statuses.choose(&mut rand::rng()).cloned();
    let Some(status) = chosen else {
        warn!(path = %path.display(), "Presence file has no statuses, skipping rotation");
        return;
    };

    match sink.set_presence(&status).await {
        Ok(()) => debug!(status = %status, "Presence rotated"),
        Err(e) => warn!(status = %status, error = %e, "Presence update failed"),
    }
}

fn read_statuses(path: &Path) -> Result<Vec<String>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}
