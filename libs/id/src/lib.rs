//! # scrimd-id
//!
//! Stable ID types, parsing, and validation for scrimd.
//!
//! ## ID Format
//!
//! System-generated IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Example: `scrim_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//!
//! This format provides:
//! - Type safety (prefix indicates resource type)
//! - Sortability (ULID is time-ordered)
//! - Human readability (clear prefixes)
//!
//! Participant IDs are the exception: the chat platform mints those, so they
//! are validated opaque strings, never generated here.

mod error;
mod types;

pub use error::IdError;
pub use types::{ParticipantId, ScrimId};

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
