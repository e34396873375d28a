//! Scrim lifecycle coordination.
//!
//! The [`Coordinator`] owns one worker task per live scrim. Each worker
//! drains a bounded mailbox, so every mutation of a scrim's rosters and
//! every trigger fire for it are serialized through a single task; callers
//! across the process can race freely and capacity still holds exactly.
//!
//! Creation persists the scrim before its triggers are armed, which means a
//! crash between the two leaves a record that [`Coordinator::restore`] picks
//! up, never a timer without a record. Restore pushes overdue fires into the
//! mailbox in phase order before the worker handles anything else.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{Dispatcher, TriggerKind};
use crate::notify::{RosterListener, RosterUpdate};
use crate::schedule::{self, ScheduleError, TriggerPair};
use crate::store::ScrimStore;
use scrimd_id::{ParticipantId, ScrimId};
use scrimd_roster::{RosterEffect, RosterLimits, RosterOutcome, RosterSlot, Scrim};

/// Commands queue here while a worker is busy; beyond this the caller waits.
const MAILBOX_SIZE: usize = 64;

// ===== Requests and errors =====

/// A request to open a new scrim.
#[derive(Debug, Clone)]
pub struct CreateScrim {
    /// Four-digit clock time, e.g. "1800".
    pub time_of_day: String,
    /// Label into the configured zone table, e.g. "UK".
    pub zone: String,
    /// Whether the requester may open scrims at all.
    pub authorized: bool,
    /// Where the request came from, echoed back on every notice.
    pub origin: String,
}

/// Why a scrim could not be created.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("not authorized to open scrims")]
    NotAuthorized,
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Why a command against an existing scrim failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No live worker for this id. Raced with removal or shutdown, or the
    /// id never existed.
    #[error("unknown scrim {0}")]
    UnknownScrim(ScrimId),
}

/// One unit of work in a scrim's mailbox.
#[derive(Debug)]
pub enum ScrimCommand {
    Signup {
        participant: ParticipantId,
        slot: RosterSlot,
        reply: oneshot::Sender<Result<RosterOutcome, CommandError>>,
    },
    Withdraw {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<RosterOutcome, CommandError>>,
    },
    Fire {
        kind: TriggerKind,
    },
}

// ===== Coordinator =====

/// Handle to one live scrim: its mailbox and its armed timers.
struct ScrimRuntime {
    tx: mpsc::Sender<ScrimCommand>,
    triggers: TriggerPair,
}

/// Front door for scrim lifecycle operations.
pub struct Coordinator {
    config: Config,
    store: Arc<ScrimStore>,
    dispatcher: Arc<Dispatcher>,
    listener: Arc<dyn RosterListener>,
    scrims: RwLock<HashMap<ScrimId, ScrimRuntime>>,
    shutdown: watch::Receiver<bool>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        store: Arc<ScrimStore>,
        dispatcher: Arc<Dispatcher>,
        listener: Arc<dyn RosterListener>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
            listener,
            scrims: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Open a scrim starting at the given clock time today.
    ///
    /// The record reaches the store with empty rosters before any trigger is
    /// armed. A start time already past is accepted; its notifications go
    /// out immediately.
    pub async fn create(&self, request: CreateScrim) -> Result<Scrim, CreateError> {
        if !request.authorized {
            warn!(origin = %request.origin, "Unauthorized scrim creation rejected");
            return Err(CreateError::NotAuthorized);
        }

        let starts_at = schedule::resolve_start(
            &request.time_of_day,
            &request.zone,
            &self.config.zones,
            Utc::now(),
        )?;

        let scrim = Scrim::new(ScrimId::new(), starts_at, request.zone, request.origin);
        info!(
            scrim_id = %scrim.id,
            starts_at = %scrim.starts_at,
            zone = %scrim.timezone,
            origin = %scrim.origin,
            "Scrim created"
        );

        self.store.upsert(scrim.clone()).await;
        self.spawn_worker(&scrim).await;
        Ok(scrim)
    }

    /// Add a participant to the given roster.
    pub async fn signup(
        &self,
        id: ScrimId,
        participant: ParticipantId,
        slot: RosterSlot,
    ) -> Result<RosterOutcome, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            id,
            ScrimCommand::Signup {
                participant,
                slot,
                reply,
            },
        )
        .await?;
        rx.await.map_err(|_| CommandError::UnknownScrim(id))?
    }

    /// Take a participant off whichever roster holds them.
    pub async fn withdraw(
        &self,
        id: ScrimId,
        participant: ParticipantId,
    ) -> Result<RosterOutcome, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(id, ScrimCommand::Withdraw { participant, reply })
            .await?;
        rx.await.map_err(|_| CommandError::UnknownScrim(id))?
    }

    /// Tear a scrim down: cancel its timers, drop its worker, delete its
    /// record. Commands already in flight resolve as unknown-scrim.
    pub async fn remove(&self, id: ScrimId) -> bool {
        if let Some(runtime) = self.scrims.write().await.remove(&id) {
            runtime.triggers.cancel();
        }
        let removed = self.store.remove(&id).await.is_some();
        if removed {
            info!(scrim_id = %id, "Scrim removed");
        }
        removed
    }

    /// Spawn workers for every scrim in the store.
    ///
    /// Phases whose instant passed while the process was down fire on the
    /// spot, start before reserve. Returns how many scrims came back.
    pub async fn restore(&self) -> usize {
        let scrims = self.store.all().await;
        let count = scrims.len();
        for scrim in &scrims {
            self.spawn_worker(scrim).await;
        }
        if count > 0 {
            info!(count, "Scrims restored from state file");
        }
        count
    }

    pub async fn get(&self, id: ScrimId) -> Option<Scrim> {
        self.store.get(&id).await
    }

    pub async fn list(&self) -> Vec<Scrim> {
        self.store.all().await
    }

    async fn spawn_worker(&self, scrim: &Scrim) {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let triggers = schedule::arm_triggers(
            scrim,
            self.config.reserve_delay,
            &tx,
            &self.shutdown,
            Utc::now(),
        )
        .await;

        let worker = ScrimWorker {
            id: scrim.id,
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            listener: Arc::clone(&self.listener),
            limits: self.config.limits,
        };
        tokio::spawn(worker.run(rx, self.shutdown.clone()));

        self.scrims
            .write()
            .await
            .insert(scrim.id, ScrimRuntime { tx, triggers });
        debug!(scrim_id = %scrim.id, "Scrim worker started");
    }

    async fn send_command(&self, id: ScrimId, cmd: ScrimCommand) -> Result<(), CommandError> {
        let tx = {
            let scrims = self.scrims.read().await;
            let Some(runtime) = scrims.get(&id) else {
                return Err(CommandError::UnknownScrim(id));
            };
            runtime.tx.clone()
        };
        tx.send(cmd)
            .await
            .map_err(|_| CommandError::UnknownScrim(id))
    }
}

// ===== Worker =====

/// The single task through which one scrim's state is mutated.
struct ScrimWorker {
    id: ScrimId,
    store: Arc<ScrimStore>,
    dispatcher: Arc<Dispatcher>,
    listener: Arc<dyn RosterListener>,
    limits: RosterLimits,
}

impl ScrimWorker {
    async fn run(self, mut rx: mpsc::Receiver<ScrimCommand>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(scrim_id = %self.id, "Scrim worker shutting down");
                        break;
                    }
                }
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!(scrim_id = %self.id, "Mailbox closed, scrim worker exiting");
                        break;
                    };
                    self.handle(cmd).await;
                }
            }
        }
    }

    async fn handle(&self, cmd: ScrimCommand) {
        match cmd {
            ScrimCommand::Signup {
                participant,
                slot,
                reply,
            } => {
                let result = self
                    .apply_roster(|scrim| scrim.signup(&participant, slot, self.limits))
                    .await;
                if let Ok(outcome) = &result {
                    debug!(
                        scrim_id = %self.id,
                        participant = %participant,
                        slot = %slot,
                        outcome = ?outcome,
                        "Signup handled"
                    );
                }
                let _ = reply.send(result);
            }
            ScrimCommand::Withdraw { participant, reply } => {
                let result = self
                    .apply_roster(|scrim| scrim.withdraw(&participant))
                    .await;
                if let Ok(outcome) = &result {
                    debug!(
                        scrim_id = %self.id,
                        participant = %participant,
                        outcome = ?outcome,
                        "Withdraw handled"
                    );
                }
                let _ = reply.send(result);
            }
            ScrimCommand::Fire { kind } => {
                self.dispatcher.fire(&self.store, self.id, kind).await;
            }
        }
    }

    /// Apply a roster mutation through the store's in-place update, pushing
    /// a snapshot to the listener when anything changed. A scrim removed
    /// while the command sat in the mailbox resolves as unknown.
    async fn apply_roster<F>(&self, f: F) -> Result<RosterOutcome, CommandError>
    where
        F: FnOnce(&mut Scrim) -> RosterEffect,
    {
        let Some((effect, update)) = self
            .store
            .update(&self.id, |scrim| {
                let effect = f(scrim);
                let update = effect.changed.then(|| RosterUpdate {
                    scrim: scrim.id,
                    main: scrim.main.clone(),
                    reserve: scrim.reserve.clone(),
                    main_limit: self.limits.main,
                    reserve_limit: self.limits.reserve,
                });
                (effect, update)
            })
            .await
        else {
            return Err(CommandError::UnknownScrim(self.id));
        };

        if let Some(update) = update {
            self.listener.roster_changed(update).await;
        }
        Ok(effect.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DeliveryBudget;
    use crate::notify::{NoticeKind, RecordingListener, RecordingNotifier};
    use chrono::TimeDelta;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        coordinator: Coordinator,
        store: Arc<ScrimStore>,
        notifier: RecordingNotifier,
        shutdown_tx: watch::Sender<bool>,
    }

    fn test_config(dir: &TempDir) -> Config {
        Config {
            state_file: dir.path().join("scrims.json"),
            limits: RosterLimits::default(),
            reserve_delay: Duration::from_millis(120),
            zones: BTreeMap::from([
                ("UK".to_string(), chrono_tz::Europe::London),
                ("NY".to_string(), chrono_tz::America::New_York),
            ]),
            delivery: DeliveryBudget {
                timeout: Duration::from_millis(50),
                retries: 0,
                backoff: Duration::from_millis(5),
            },
            presence_file: dir.path().join("presence.json"),
            presence_interval: Duration::from_secs(600),
            log_level: "info".to_string(),
        }
    }

    fn harness(dir: &TempDir) -> Harness {
        let config = test_config(dir);
        let store = Arc::new(ScrimStore::open(config.state_file.clone()).unwrap());
        let notifier = RecordingNotifier::new();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(notifier.clone()),
            config.delivery,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(
            config,
            Arc::clone(&store),
            dispatcher,
            Arc::new(RecordingListener::new()),
            shutdown_rx,
        );
        Harness {
            coordinator,
            store,
            notifier,
            shutdown_tx,
        }
    }

    fn p(name: &str) -> ParticipantId {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_authorization() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let err = h
            .coordinator
            .create(CreateScrim {
                time_of_day: "1800".to_string(),
                zone: "UK".to_string(),
                authorized: false,
                origin: "channel-1".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CreateError::NotAuthorized));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_time_and_unknown_zone() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let err = h
            .coordinator
            .create(CreateScrim {
                time_of_day: "25xx".to_string(),
                zone: "UK".to_string(),
                authorized: true,
                origin: "channel-1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CreateError::Schedule(ScheduleError::InvalidTime(_))
        ));

        let err = h
            .coordinator
            .create(CreateScrim {
                time_of_day: "1800".to_string(),
                zone: "Mars".to_string(),
                authorized: true,
                origin: "channel-1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CreateError::Schedule(ScheduleError::UnknownZone(_))
        ));

        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_signup_against_unknown_scrim_fails() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let id = ScrimId::new();
        let err = h
            .coordinator
            .signup(id, p("alice"), RosterSlot::Main)
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownScrim(id));
    }

    #[tokio::test]
    async fn test_roster_commands_are_serialized_through_the_worker() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        // A scrim an hour out: no trigger noise during the test.
        let scrim = Scrim::new(
            ScrimId::new(),
            Utc::now() + TimeDelta::hours(1),
            "UK",
            "channel-1",
        );
        let id = scrim.id;
        h.store.upsert(scrim).await;
        assert_eq!(h.coordinator.restore().await, 1);

        let outcome = h
            .coordinator
            .signup(id, p("alice"), RosterSlot::Main)
            .await
            .unwrap();
        assert_eq!(outcome, RosterOutcome::Signed);

        let outcome = h
            .coordinator
            .signup(id, p("alice"), RosterSlot::Reserve)
            .await
            .unwrap();
        assert_eq!(outcome, RosterOutcome::Signed);

        let outcome = h.coordinator.withdraw(id, p("alice")).await.unwrap();
        assert_eq!(outcome, RosterOutcome::Removed);

        let outcome = h.coordinator.withdraw(id, p("alice")).await.unwrap();
        assert_eq!(outcome, RosterOutcome::NotSignedUp);

        let stored = h.store.get(&id).await.unwrap();
        assert!(stored.main.is_empty() && stored.reserve.is_empty());
    }

    #[tokio::test]
    async fn test_restore_fires_overdue_phases_in_order() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let mut scrim = Scrim::new(
            ScrimId::new(),
            Utc::now() - TimeDelta::minutes(10),
            "UK",
            "thread-1",
        );
        let limits = RosterLimits::default();
        scrim.signup(&p("alice"), RosterSlot::Main, limits);
        scrim.signup(&p("bob"), RosterSlot::Main, limits);
        scrim.signup(&p("rita"), RosterSlot::Reserve, limits);
        let id = scrim.id;
        h.store.upsert(scrim).await;

        assert_eq!(h.coordinator.restore().await, 1);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let deliveries = h.notifier.deliveries().await;
        let kinds: Vec<_> = deliveries.iter().map(|(p, n)| (p.clone(), n.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (p("alice"), NoticeKind::ScrimStarting),
                (p("bob"), NoticeKind::ScrimStarting),
                (p("rita"), NoticeKind::ReserveNeeded),
            ]
        );
        assert!(deliveries.iter().all(|(_, n)| n.origin == "thread-1"));

        let stored = h.store.get(&id).await.unwrap();
        assert!(stored.notified_main && stored.notified_reserve);
    }

    #[tokio::test]
    async fn test_restore_skips_phases_already_notified() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let mut scrim = Scrim::new(
            ScrimId::new(),
            Utc::now() - TimeDelta::minutes(10),
            "UK",
            "channel-1",
        );
        scrim.signup(&p("alice"), RosterSlot::Main, RosterLimits::default());
        scrim.notified_main = true;
        scrim.notified_reserve = true;
        h.store.upsert(scrim).await;

        h.coordinator.restore().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.notifier.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_cancels_pending_triggers() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let mut scrim = Scrim::new(
            ScrimId::new(),
            Utc::now() + TimeDelta::milliseconds(250),
            "UK",
            "channel-1",
        );
        scrim.signup(&p("alice"), RosterSlot::Main, RosterLimits::default());
        let id = scrim.id;
        h.store.upsert(scrim).await;
        h.coordinator.restore().await;

        assert!(h.coordinator.remove(id).await);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(h.notifier.deliveries().await.is_empty());
        assert!(h.store.get(&id).await.is_none());

        let err = h
            .coordinator
            .signup(id, p("bob"), RosterSlot::Main)
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownScrim(id));
    }

    #[tokio::test]
    async fn test_remove_of_unknown_scrim_reports_false() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);
        assert!(!h.coordinator.remove(ScrimId::new()).await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting_commands() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let scrim = Scrim::new(
            ScrimId::new(),
            Utc::now() + TimeDelta::hours(1),
            "UK",
            "channel-1",
        );
        let id = scrim.id;
        h.store.upsert(scrim).await;
        h.coordinator.restore().await;

        h.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = h
            .coordinator
            .signup(id, p("alice"), RosterSlot::Main)
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownScrim(id));
    }
}
