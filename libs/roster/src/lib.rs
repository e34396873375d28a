//! Scrim records and roster mutation rules.
//!
//! This library owns the pure decision logic for scrim signups: who ends up
//! on which roster, in what order, and when a request bounces. Key concepts:
//!
//! - **Main roster**: the starting lineup, capacity-bounded.
//! - **Reserve roster**: the backup lineup, capacity-bounded.
//! - **Switching**: signing up for one roster implicitly leaves the other.
//!
//! # Invariants
//!
//! - A participant appears in at most one roster at a time
//! - Rosters hold no duplicates and never exceed their limits
//! - Roster order is first-come-first-served and dense (no holes)
//! - Notification flags only ever move from unsent to sent

use chrono::{DateTime, Utc};
use scrimd_id::{ParticipantId, ScrimId};
use serde::{Deserialize, Serialize};

/// Default capacity of the main roster.
pub const DEFAULT_MAIN_LIMIT: usize = 10;

/// Default capacity of the reserve roster.
pub const DEFAULT_RESERVE_LIMIT: usize = 5;

/// Roster capacity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterLimits {
    /// Maximum main roster size.
    pub main: usize,

    /// Maximum reserve roster size.
    pub reserve: usize,
}

impl Default for RosterLimits {
    fn default() -> Self {
        Self {
            main: DEFAULT_MAIN_LIMIT,
            reserve: DEFAULT_RESERVE_LIMIT,
        }
    }
}

impl RosterLimits {
    /// The limit applying to the given slot.
    #[must_use]
    pub fn for_slot(&self, slot: RosterSlot) -> usize {
        match slot {
            RosterSlot::Main => self.main,
            RosterSlot::Reserve => self.reserve,
        }
    }
}

/// The two rosters a participant can sign up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterSlot {
    Main,
    Reserve,
}

impl RosterSlot {
    /// The other roster.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Main => Self::Reserve,
            Self::Reserve => Self::Main,
        }
    }
}

impl std::fmt::Display for RosterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Reserve => write!(f, "reserve"),
        }
    }
}

/// Outcome of a roster operation, reported back to the requesting
/// participant. These are expected results of ordinary use, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterOutcome {
    /// The participant was added to the requested roster.
    Signed,

    /// The participant was already on the requested roster.
    AlreadySignedUp,

    /// The requested roster is at capacity.
    ListFull,

    /// The participant was removed from their roster.
    Removed,

    /// The participant was not on any roster.
    NotSignedUp,
}

/// Result of applying a roster operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEffect {
    /// What the operation decided.
    pub outcome: RosterOutcome,

    /// Whether the scrim state changed and must be persisted.
    ///
    /// Not implied by the outcome: a `ListFull` signup still changed state
    /// when it pulled the participant off the other roster first.
    pub changed: bool,
}

/// One scheduled scrim: a start instant plus two ordered rosters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scrim {
    /// Stable ID, assigned at creation.
    pub id: ScrimId,

    /// Absolute start instant.
    pub starts_at: DateTime<Utc>,

    /// Zone label the start time was announced under. Display only; the
    /// resolved `starts_at` is authoritative.
    pub timezone: String,

    /// Where the scrim was opened (channel, thread). Echoed into notices so
    /// the display side can route replies.
    pub origin: String,

    /// Main roster, first-come-first-served.
    pub main: Vec<ParticipantId>,

    /// Reserve roster, first-come-first-served.
    pub reserve: Vec<ParticipantId>,

    /// Whether the start notification went out.
    pub notified_main: bool,

    /// Whether the reserve call-up went out.
    pub notified_reserve: bool,
}

impl Scrim {
    /// Creates a scrim with empty rosters and unsent notifications.
    #[must_use]
    pub fn new(
        id: ScrimId,
        starts_at: DateTime<Utc>,
        timezone: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id,
            starts_at,
            timezone: timezone.into(),
            origin: origin.into(),
            main: Vec::new(),
            reserve: Vec::new(),
            notified_main: false,
            notified_reserve: false,
        }
    }

    /// Returns the roster for the given slot.
    #[must_use]
    pub fn roster(&self, slot: RosterSlot) -> &[ParticipantId] {
        match slot {
            RosterSlot::Main => &self.main,
            RosterSlot::Reserve => &self.reserve,
        }
    }

    fn roster_mut(&mut self, slot: RosterSlot) -> &mut Vec<ParticipantId> {
        match slot {
            RosterSlot::Main => &mut self.main,
            RosterSlot::Reserve => &mut self.reserve,
        }
    }

    /// Returns the slot currently holding the participant, if any.
    #[must_use]
    pub fn slot_of(&self, participant: &ParticipantId) -> Option<RosterSlot> {
        if self.main.contains(participant) {
            Some(RosterSlot::Main)
        } else if self.reserve.contains(participant) {
            Some(RosterSlot::Reserve)
        } else {
            None
        }
    }

    /// Signs a participant up for the given roster.
    ///
    /// Signing up for one roster leaves the other: a reserve asking for main
    /// is a switch, not a duplicate entry. The switch out of the old roster
    /// sticks even when the new roster turns out to be full, so a `ListFull`
    /// effect can still carry `changed: true` and an empty seat behind it.
    pub fn signup(
        &mut self,
        participant: &ParticipantId,
        slot: RosterSlot,
        limits: RosterLimits,
    ) -> RosterEffect {
        let mut changed = false;

        // Leave the other roster first; switching is implicit.
        let other = self.roster_mut(slot.other());
        if let Some(pos) = other.iter().position(|p| p == participant) {
            other.remove(pos);
            changed = true;
        }

        let limit = limits.for_slot(slot);
        let roster = self.roster_mut(slot);

        if roster.contains(participant) {
            return RosterEffect {
                outcome: RosterOutcome::AlreadySignedUp,
                changed,
            };
        }

        if roster.len() >= limit {
            return RosterEffect {
                outcome: RosterOutcome::ListFull,
                changed,
            };
        }

        roster.push(participant.clone());
        RosterEffect {
            outcome: RosterOutcome::Signed,
            changed: true,
        }
    }

    /// Withdraws a participant from whichever roster holds them.
    ///
    /// Later entries shift down to keep the roster dense.
    pub fn withdraw(&mut self, participant: &ParticipantId) -> RosterEffect {
        for slot in [RosterSlot::Main, RosterSlot::Reserve] {
            let roster = self.roster_mut(slot);
            if let Some(pos) = roster.iter().position(|p| p == participant) {
                roster.remove(pos);
                return RosterEffect {
                    outcome: RosterOutcome::Removed,
                    changed: true,
                };
            }
        }

        RosterEffect {
            outcome: RosterOutcome::NotSignedUp,
            changed: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u64) -> ParticipantId {
        ParticipantId::parse(&format!("{}", 1000 + n)).unwrap()
    }

    fn scrim() -> Scrim {
        Scrim::new(ScrimId::new(), Utc::now(), "UK", "channel-1")
    }

    fn assert_invariants(scrim: &Scrim, limits: RosterLimits) {
        assert!(scrim.main.len() <= limits.main, "main roster over limit");
        assert!(
            scrim.reserve.len() <= limits.reserve,
            "reserve roster over limit"
        );

        let mut seen = std::collections::HashSet::new();
        for p in scrim.main.iter().chain(scrim.reserve.iter()) {
            assert!(seen.insert(p.clone()), "participant {p} on two rosters");
        }
    }

    #[test]
    fn test_new_scrim_is_blank() {
        let s = scrim();
        assert!(s.main.is_empty());
        assert!(s.reserve.is_empty());
        assert!(!s.notified_main);
        assert!(!s.notified_reserve);
    }

    #[test]
    fn test_signup_keeps_arrival_order() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        for n in 0..4 {
            let effect = s.signup(&pid(n), RosterSlot::Main, limits);
            assert_eq!(effect.outcome, RosterOutcome::Signed);
            assert!(effect.changed);
        }

        assert_eq!(s.main, vec![pid(0), pid(1), pid(2), pid(3)]);
    }

    #[test]
    fn test_signup_bounces_when_full() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        for n in 0..limits.main as u64 {
            assert_eq!(
                s.signup(&pid(n), RosterSlot::Main, limits).outcome,
                RosterOutcome::Signed
            );
        }

        let effect = s.signup(&pid(99), RosterSlot::Main, limits);
        assert_eq!(effect.outcome, RosterOutcome::ListFull);
        assert!(!effect.changed);
        assert_eq!(s.main.len(), limits.main);
    }

    #[test]
    fn test_duplicate_signup_reports_already_signed_up() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        s.signup(&pid(1), RosterSlot::Reserve, limits);
        let effect = s.signup(&pid(1), RosterSlot::Reserve, limits);

        assert_eq!(effect.outcome, RosterOutcome::AlreadySignedUp);
        assert!(!effect.changed);
        assert_eq!(s.reserve.len(), 1);
    }

    #[test]
    fn test_signup_switches_rosters() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        s.signup(&pid(1), RosterSlot::Reserve, limits);
        let effect = s.signup(&pid(1), RosterSlot::Main, limits);

        assert_eq!(effect.outcome, RosterOutcome::Signed);
        assert!(s.reserve.is_empty());
        assert_eq!(s.main, vec![pid(1)]);
        assert_eq!(s.slot_of(&pid(1)), Some(RosterSlot::Main));
    }

    #[test]
    fn test_switch_into_full_roster_does_not_roll_back() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        for n in 0..limits.main as u64 {
            s.signup(&pid(n), RosterSlot::Main, limits);
        }
        s.signup(&pid(50), RosterSlot::Reserve, limits);

        // The switch vacates the reserve seat even though main is full.
        let effect = s.signup(&pid(50), RosterSlot::Main, limits);
        assert_eq!(effect.outcome, RosterOutcome::ListFull);
        assert!(effect.changed);
        assert_eq!(s.slot_of(&pid(50)), None);
    }

    #[test]
    fn test_withdraw_then_withdraw_again() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        s.signup(&pid(1), RosterSlot::Main, limits);

        let first = s.withdraw(&pid(1));
        assert_eq!(first.outcome, RosterOutcome::Removed);
        assert!(first.changed);

        let second = s.withdraw(&pid(1));
        assert_eq!(second.outcome, RosterOutcome::NotSignedUp);
        assert!(!second.changed);
    }

    #[test]
    fn test_withdraw_keeps_roster_dense() {
        let mut s = scrim();
        let limits = RosterLimits::default();

        for n in 0..5 {
            s.signup(&pid(n), RosterSlot::Main, limits);
        }
        s.withdraw(&pid(2));

        assert_eq!(s.main, vec![pid(0), pid(1), pid(3), pid(4)]);
    }

    #[test]
    fn test_zero_limit_rejects_everyone() {
        let mut s = scrim();
        let limits = RosterLimits { main: 0, reserve: 0 };

        let effect = s.signup(&pid(1), RosterSlot::Main, limits);
        assert_eq!(effect.outcome, RosterOutcome::ListFull);
        assert!(!effect.changed);
    }

    #[test]
    fn test_random_op_sweep_holds_invariants() {
        // Deterministic LCG so the sweep is reproducible without extra deps.
        fn next_rand(state: &mut u64) -> u64 {
            *state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *state >> 33
        }

        let mut s = scrim();
        let limits = RosterLimits::default();
        let mut state = 0x5eed_u64;

        for _ in 0..500 {
            let p = pid(next_rand(&mut state) % 20);
            match next_rand(&mut state) % 3 {
                0 => {
                    s.signup(&p, RosterSlot::Main, limits);
                }
                1 => {
                    s.signup(&p, RosterSlot::Reserve, limits);
                }
                _ => {
                    s.withdraw(&p);
                }
            }
            assert_invariants(&s, limits);
        }
    }

    #[test]
    fn test_scrim_json_roundtrip() {
        let mut s = scrim();
        let limits = RosterLimits::default();
        s.signup(&pid(1), RosterSlot::Main, limits);
        s.signup(&pid(2), RosterSlot::Reserve, limits);
        s.notified_main = true;

        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"notified_main\":true"));
        assert!(json.contains("\"notified_reserve\":false"));

        let parsed: Scrim = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, s);
    }
}
