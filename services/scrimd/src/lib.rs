//! scrimd Library
//!
//! scrimd manages timed group-signup events ("scrims"): a coordinator opens
//! an event for a clock time in a named zone, participants claim main or
//! reserve roster seats, and the daemon notifies the main roster at start and
//! calls up reserves a fixed delay later. State survives restarts; overdue
//! notifications are delivered on the next boot.
//!
//! ## Architecture
//!
//! - **Coordinator**: per-scrim worker tasks serialize roster changes and
//!   trigger firings for one scrim
//! - **Store**: JSON snapshot persistence, atomic replace on every change
//! - **Schedule**: local-time resolution and fire-once trigger timers
//! - **Dispatcher**: idempotent notification fan-out under a delivery budget
//! - **Presence**: periodic idle-status rotation
//!
//! Platform specifics (commands, message transport, permission checks) stay
//! behind the traits in [`notify`]; front ends link this crate and call the
//! [`coordinator::Coordinator`] API.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod notify;
pub mod presence;
pub mod schedule;
pub mod store;

// Re-export commonly used types
pub use coordinator::{CommandError, Coordinator, CreateError, CreateScrim};
pub use dispatch::{DeliveryBudget, Dispatcher, TriggerKind};
pub use notify::{Notice, NoticeKind, Notifier, PresenceSink, RosterListener, RosterUpdate};
pub use schedule::ScheduleError;
pub use store::{ScrimStore, StoreError};
