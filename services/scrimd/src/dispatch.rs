//! Trigger handling: turns an elapsed timer into a notification batch.
//!
//! Firing is idempotent per phase. The notified flag is checked before
//! delivery and flipped after, and since every fire for a scrim runs on that
//! scrim's worker, a duplicate trigger always observes the first one's flag.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::notify::{Notice, NoticeKind, Notifier};
use crate::store::ScrimStore;
use scrimd_id::{ParticipantId, ScrimId};
use scrimd_roster::{RosterSlot, Scrim};

/// Which trigger phase elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// The start instant.
    Start,
    /// The reserve call-up mark after the start.
    Reserve,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Start => write!(f, "start"),
            TriggerKind::Reserve => write!(f, "reserve"),
        }
    }
}

/// What one participant's delivery may cost before it is skipped.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryBudget {
    /// Cap on a single delivery attempt.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for DeliveryBudget {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Delivers the notification batch for an elapsed trigger.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    budget: DeliveryBudget,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, budget: DeliveryBudget) -> Self {
        Self { notifier, budget }
    }

    /// Handle one elapsed trigger for the scrim.
    ///
    /// Delivery is best-effort: a participant whose budget runs out is
    /// skipped, and the phase flag flips regardless so the batch never
    /// repeats. A reserve fire arriving before the start notification went
    /// out is dropped whole; its phase stays unnotified. A scrim removed
    /// while the batch is in flight stays removed; the flag write finds
    /// nothing to mark.
    pub async fn fire(&self, store: &ScrimStore, id: ScrimId, kind: TriggerKind) {
        let Some(scrim) = store.get(&id).await else {
            debug!(scrim_id = %id, kind = %kind, "Trigger for unknown scrim, ignoring");
            return;
        };

        match kind {
            TriggerKind::Start => {
                if scrim.notified_main {
                    debug!(scrim_id = %id, "Start already notified, ignoring");
                    return;
                }
                self.notify_roster(&scrim, NoticeKind::ScrimStarting).await;
                if store.update(&id, |s| s.notified_main = true).await.is_none() {
                    debug!(scrim_id = %id, "Scrim removed during delivery, flag not written");
                }
            }
            TriggerKind::Reserve => {
                if scrim.notified_reserve {
                    debug!(scrim_id = %id, "Reserve already notified, ignoring");
                    return;
                }
                // Reserve call-up never overtakes the start notification.
                if !scrim.notified_main {
                    debug!(scrim_id = %id, "Reserve fire before start notification, ignoring");
                    return;
                }
                self.notify_roster(&scrim, NoticeKind::ReserveNeeded).await;
                if store.update(&id, |s| s.notified_reserve = true).await.is_none() {
                    debug!(scrim_id = %id, "Scrim removed during delivery, flag not written");
                }
            }
        }
    }

    async fn notify_roster(&self, scrim: &Scrim, kind: NoticeKind) {
        let slot = match kind {
            NoticeKind::ScrimStarting => RosterSlot::Main,
            NoticeKind::ReserveNeeded => RosterSlot::Reserve,
        };
        let roster = scrim.roster(slot);

        if roster.is_empty() {
            info!(scrim_id = %scrim.id, kind = %kind, "Roster empty, nothing to deliver");
            return;
        }

        let notice = Notice {
            kind,
            scrim: scrim.id,
            starts_at: scrim.starts_at,
            timezone: scrim.timezone.clone(),
            origin: scrim.origin.clone(),
        };

        info!(
            scrim_id = %scrim.id,
            kind = %kind,
            recipients = roster.len(),
            "Delivering notifications"
        );

        let mut delivered = 0usize;
        for participant in roster {
            if self.deliver_one(participant, &notice).await {
                delivered += 1;
            }
        }

        info!(
            scrim_id = %scrim.id,
            kind = %kind,
            delivered,
            skipped = roster.len() - delivered,
            "Notification batch complete"
        );
    }

    /// Deliver to one participant within the budget. Returns whether a
    /// delivery attempt succeeded.
    async fn deliver_one(&self, participant: &ParticipantId, notice: &Notice) -> bool {
        let attempts = self.budget.retries + 1;

        for attempt in 1..=attempts {
            match timeout(self.budget.timeout, self.notifier.deliver(participant, notice)).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => {
                    warn!(
                        participant = %participant,
                        scrim_id = %notice.scrim,
                        attempt,
                        error = %e,
                        "Delivery failed"
                    );
                }
                Err(_) => {
                    warn!(
                        participant = %participant,
                        scrim_id = %notice.scrim,
                        attempt,
                        timeout_ms = self.budget.timeout.as_millis() as u64,
                        "Delivery timed out"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.budget.backoff).await;
            }
        }

        warn!(
            participant = %participant,
            scrim_id = %notice.scrim,
            "Delivery budget spent, skipping participant"
        );
        false
    }
}
