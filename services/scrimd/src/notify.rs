//! Outbound seams: notification delivery, roster-change fanout, presence.
//!
//! The scheduler core never talks to a chat platform directly. Everything
//! outward-facing goes through the traits here, so the binary can wire in a
//! real transport while tests wire in recording doubles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use scrimd_id::{ParticipantId, ScrimId};

// ===== Notices =====

/// Which notification a notice carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// The scrim's start instant has arrived; sent to the main roster.
    ScrimStarting,
    /// The reserve window has opened; sent to the reserve roster.
    ReserveNeeded,
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoticeKind::ScrimStarting => write!(f, "scrim_starting"),
            NoticeKind::ReserveNeeded => write!(f, "reserve_needed"),
        }
    }
}

/// One notification, addressed to a single participant by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub scrim: ScrimId,
    pub starts_at: DateTime<Utc>,
    /// Zone label the scrim was announced in, for rendering.
    pub timezone: String,
    /// Where the scrim was opened from, so the transport can reply in place.
    pub origin: String,
}

// ===== Seams =====

/// Delivers a notice to one participant.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, participant: &ParticipantId, notice: &Notice) -> Result<()>;
}

/// Observes roster changes after they are applied and persisted.
#[async_trait]
pub trait RosterListener: Send + Sync {
    async fn roster_changed(&self, update: RosterUpdate);
}

/// Receives presence rotation updates.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn set_presence(&self, status: &str) -> Result<()>;
}

/// Snapshot of a scrim's rosters pushed to a [`RosterListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUpdate {
    pub scrim: ScrimId,
    pub main: Vec<ParticipantId>,
    pub reserve: Vec<ParticipantId>,
    pub main_limit: usize,
    pub reserve_limit: usize,
}

// ===== Log-only implementations =====

/// Notifier that writes notices to the log instead of a transport.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, participant: &ParticipantId, notice: &Notice) -> Result<()> {
        info!(
            participant = %participant,
            scrim_id = %notice.scrim,
            kind = %notice.kind,
            starts_at = %notice.starts_at,
            origin = %notice.origin,
            "Notice delivered"
        );
        Ok(())
    }
}

/// Listener that logs roster snapshots.
pub struct LogListener;

#[async_trait]
impl RosterListener for LogListener {
    async fn roster_changed(&self, update: RosterUpdate) {
        info!(
            scrim_id = %update.scrim,
            main = update.main.len(),
            main_limit = update.main_limit,
            reserve = update.reserve.len(),
            reserve_limit = update.reserve_limit,
            "Roster changed"
        );
    }
}

/// Presence sink that logs the chosen status line.
pub struct LogPresence;

#[async_trait]
impl PresenceSink for LogPresence {
    async fn set_presence(&self, status: &str) -> Result<()> {
        info!(status, "Presence updated");
        Ok(())
    }
}

// ===== Recording doubles =====

/// Notifier that records every delivery, with optional induced failures.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    deliveries: Arc<tokio::sync::Mutex<Vec<(ParticipantId, Notice)>>>,
    fail_first: Arc<tokio::sync::Mutex<u32>>,
    hang_for: Option<Duration>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` deliveries, then succeed.
    #[must_use]
    pub fn failing_first(count: u32) -> Self {
        Self {
            fail_first: Arc::new(tokio::sync::Mutex::new(count)),
            ..Self::default()
        }
    }

    /// Stall every delivery for `delay` before recording it.
    #[must_use]
    pub fn hanging(delay: Duration) -> Self {
        Self {
            hang_for: Some(delay),
            ..Self::default()
        }
    }

    pub async fn deliveries(&self) -> Vec<(ParticipantId, Notice)> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, participant: &ParticipantId, notice: &Notice) -> Result<()> {
        if let Some(delay) = self.hang_for {
            tokio::time::sleep(delay).await;
        }
        {
            let mut remaining = self.fail_first.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("delivery refused");
            }
        }
        self.deliveries
            .lock()
            .await
            .push((participant.clone(), notice.clone()));
        Ok(())
    }
}

/// Listener that records every roster snapshot it receives.
#[derive(Clone, Default)]
pub struct RecordingListener {
    updates: Arc<tokio::sync::Mutex<Vec<RosterUpdate>>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<RosterUpdate> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl RosterListener for RecordingListener {
    async fn roster_changed(&self, update: RosterUpdate) {
        self.updates.lock().await.push(update);
    }
}

/// Presence sink that records every status it is handed.
#[derive(Clone, Default)]
pub struct RecordingPresence {
    statuses: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl RecordingPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn statuses(&self) -> Vec<String> {
        self.statuses.lock().await.clone()
    }
}

#[async_trait]
impl PresenceSink for RecordingPresence {
    async fn set_presence(&self, status: &str) -> Result<()> {
        self.statuses.lock().await.push(status.to_string());
        Ok(())
    }
}
