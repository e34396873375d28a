//! Start-time resolution and trigger timers.
//!
//! A scrim is announced as a four-digit clock time in a labeled zone
//! ("1800 UK"). Resolution interprets that as today's date in the zone and
//! converts it to an absolute UTC instant; the instant is what gets stored
//! and slept on, never the wall-clock text.
//!
//! Triggers are fire-once timer tasks that post back into the scrim's
//! mailbox. A phase whose instant is already past is not armed as a timer at
//! all: its fire is enqueued on the spot, start before reserve, which is how
//! notifications missed across a restart catch up deterministically.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::coordinator::ScrimCommand;
use crate::dispatch::TriggerKind;
use scrimd_id::ScrimId;
use scrimd_roster::Scrim;

/// Errors from start-time resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The clock time is not a valid HHMM, or names no instant in the zone
    /// on this date (spring-forward gap).
    #[error("invalid start time '{0}'")]
    InvalidTime(String),

    /// The zone label is not in the configured table.
    #[error("unknown zone '{0}'")]
    UnknownZone(String),
}

/// Resolve a four-digit clock time in a labeled zone to an absolute instant,
/// on today's date in that zone.
///
/// An ambiguous local time (clocks falling back) resolves to the earlier
/// instant. An instant already in the past is returned as-is; the trigger
/// layer turns that into an immediate fire.
pub fn resolve_start(
    hhmm: &str,
    zone_label: &str,
    zones: &BTreeMap<String, Tz>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let tz = zones
        .get(zone_label)
        .copied()
        .ok_or_else(|| ScheduleError::UnknownZone(zone_label.to_string()))?;

    let invalid = || ScheduleError::InvalidTime(hhmm.to_string());

    if hhmm.len() != 4 || !hhmm.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hour: u32 = hhmm[..2].parse().map_err(|_| invalid())?;
    let minute: u32 = hhmm[2..].parse().map_err(|_| invalid())?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;

    let date = now.with_timezone(&tz).date_naive();

    let resolved = match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => dt,
        // Clocks fell back: the label names two instants, take the earlier.
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Clocks sprang forward: the label names no instant at all.
        LocalResult::None => return Err(invalid()),
    };

    Ok(resolved.with_timezone(&Utc))
}

/// Time remaining until the instant, clamped to zero when it is already past.
#[must_use]
pub fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Time remaining until the reserve call-up of a scrim starting at `at`.
fn reserve_delay_until(at: DateTime<Utc>, reserve_delay: Duration, now: DateTime<Utc>) -> Duration {
    let offset = TimeDelta::from_std(reserve_delay).unwrap_or_default();
    ((at - now) + offset).to_std().unwrap_or(Duration::ZERO)
}

/// The fire-once timers armed for one scrim.
///
/// A phase is `None` when it needed no timer: already notified, or overdue
/// and fired on arming. Dropping the pair does not cancel the tasks; call
/// [`TriggerPair::cancel`].
pub struct TriggerPair {
    start: Option<JoinHandle<()>>,
    reserve: Option<JoinHandle<()>>,
}

impl TriggerPair {
    /// A pair with nothing armed.
    #[must_use]
    pub fn unarmed() -> Self {
        Self {
            start: None,
            reserve: None,
        }
    }

    /// Abort both timer tasks.
    pub fn cancel(&self) {
        if let Some(handle) = &self.start {
            handle.abort();
        }
        if let Some(handle) = &self.reserve {
            handle.abort();
        }
    }
}

/// Arm timers for the phases of a scrim that still owe a notification.
///
/// Already-notified phases get nothing. Overdue phases skip the timer and
/// have their fire sent into the mailbox right here, start first, so the
/// reserve guard in the dispatcher always observes the start flag in order.
pub async fn arm_triggers(
    scrim: &Scrim,
    reserve_delay: Duration,
    tx: &mpsc::Sender<ScrimCommand>,
    shutdown: &watch::Receiver<bool>,
    now: DateTime<Utc>,
) -> TriggerPair {
    let mut pair = TriggerPair::unarmed();

    if !scrim.notified_main {
        let delay = delay_until(scrim.starts_at, now);
        if delay.is_zero() {
            debug!(scrim_id = %scrim.id, "Start overdue, firing immediately");
            let _ = tx
                .send(ScrimCommand::Fire {
                    kind: TriggerKind::Start,
                })
                .await;
        } else {
            pair.start = Some(spawn_trigger(
                scrim.id,
                TriggerKind::Start,
                delay,
                tx.clone(),
                shutdown.clone(),
            ));
        }
    }

    if !scrim.notified_reserve {
        let delay = reserve_delay_until(scrim.starts_at, reserve_delay, now);
        if delay.is_zero() {
            debug!(scrim_id = %scrim.id, "Reserve call-up overdue, firing immediately");
            let _ = tx
                .send(ScrimCommand::Fire {
                    kind: TriggerKind::Reserve,
                })
                .await;
        } else {
            pair.reserve = Some(spawn_trigger(
                scrim.id,
                TriggerKind::Reserve,
                delay,
                tx.clone(),
                shutdown.clone(),
            ));
        }
    }

    pair
}

/// Spawn one fire-once timer task.
fn spawn_trigger(
    id: ScrimId,
    kind: TriggerKind,
    delay: Duration,
    tx: mpsc::Sender<ScrimCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    debug!(
        scrim_id = %id,
        kind = %kind,
        delay_ms = delay.as_millis() as u64,
        "Trigger armed"
    );

    tokio::spawn(async move {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    debug!(scrim_id = %id, kind = %kind, "Trigger elapsed");
                    // A send failure just means the scrim is gone.
                    let _ = tx.send(ScrimCommand::Fire { kind }).await;
                    return;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(scrim_id = %id, kind = %kind, "Trigger cancelled by shutdown");
                        return;
                    }
                }
            }
        }
    })
}
