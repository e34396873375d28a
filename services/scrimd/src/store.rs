//! Scrim state persistence.
//!
//! The store owns the canonical scrim table and mirrors every change to a
//! JSON snapshot on disk:
//! - Atomic replace (write to temp, rename) so a crash never leaves a torn file
//! - Full load on startup so triggers can be re-armed
//! - A failed write keeps the in-memory table authoritative; the next
//!   successful write reconciles the file

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use scrimd_id::ScrimId;
use scrimd_roster::Scrim;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Persisted scrim table format version.
const STATE_VERSION: u32 = 1;

/// Store failures. Corruption surfaces at open; write failures are absorbed
/// at the mutation entry points and logged instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state file exists but cannot be read or parsed.
    #[error("state file {path} is unreadable: {message}")]
    Corrupt { path: String, message: String },

    /// The durable write did not complete.
    #[error("failed to persist state to {path}: {message}")]
    WriteFailed { path: String, message: String },
}

/// On-disk layout of the scrim table.
#[derive(Debug, Deserialize)]
struct PersistedTable {
    /// Format version.
    version: u32,

    /// Scrims by ID.
    scrims: BTreeMap<ScrimId, Scrim>,
}

/// Borrowing twin of [`PersistedTable`], so a save never clones the table.
#[derive(Serialize)]
struct TableSnapshot<'a> {
    version: u32,
    scrims: &'a BTreeMap<ScrimId, Scrim>,
}

/// Durable scrim table.
#[derive(Debug)]
pub struct ScrimStore {
    /// Path of the snapshot file.
    path: PathBuf,

    /// Canonical table.
    table: RwLock<BTreeMap<ScrimId, Scrim>>,
}

impl ScrimStore {
    /// Open the store, loading any persisted table.
    ///
    /// A missing file is an empty store. An unreadable or unparseable file is
    /// [`StoreError::Corrupt`]; the caller decides whether to bail or restart
    /// empty via [`ScrimStore::empty`], but never silently. A version
    /// mismatch is logged and treated as fresh state.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "No state file, starting fresh");
            return Ok(Self::empty(path));
        }

        let corrupt = |message: String| StoreError::Corrupt {
            path: path.display().to_string(),
            message,
        };

        let content = fs::read_to_string(&path).map_err(|e| corrupt(e.to_string()))?;
        let persisted: PersistedTable =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;

        if persisted.version != STATE_VERSION {
            warn!(
                file_version = persisted.version,
                current_version = STATE_VERSION,
                "State file version mismatch, starting fresh"
            );
            return Ok(Self::empty(path));
        }

        info!(
            path = %path.display(),
            scrim_count = persisted.scrims.len(),
            "Loaded state from disk"
        );

        Ok(Self {
            path,
            table: RwLock::new(persisted.scrims),
        })
    }

    /// An empty store at the given path. Also the restart path after a
    /// corrupt state file, once the operator has been told.
    #[must_use]
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            table: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns a copy of the scrim, if present.
    pub async fn get(&self, id: &ScrimId) -> Option<Scrim> {
        self.table.read().await.get(id).cloned()
    }

    /// Returns all scrims, ordered by ID.
    pub async fn all(&self) -> Vec<Scrim> {
        self.table.read().await.values().cloned().collect()
    }

    /// Number of scrims in the table.
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    /// Whether the table holds no scrims.
    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }

    /// Insert or replace a scrim, then persist the table.
    ///
    /// A failed write is logged, not returned: the in-memory table has
    /// already moved and stays authoritative.
    pub async fn upsert(&self, scrim: Scrim) {
        let mut table = self.table.write().await;
        table.insert(scrim.id, scrim);
        self.persist_or_log(&table);
    }

    /// Apply `f` to the stored scrim in place, then persist. Returns `None`
    /// without running `f` when the scrim is no longer present: a caller
    /// that read its copy before a removal cannot write the record back.
    pub async fn update<T, F>(&self, id: &ScrimId, f: F) -> Option<T>
    where
        F: FnOnce(&mut Scrim) -> T,
    {
        let mut table = self.table.write().await;
        let scrim = table.get_mut(id)?;
        let out = f(scrim);
        self.persist_or_log(&table);
        Some(out)
    }

    /// Remove a scrim, then persist the table. Returns the removed record.
    pub async fn remove(&self, id: &ScrimId) -> Option<Scrim> {
        let mut table = self.table.write().await;
        let removed = table.remove(id);
        if removed.is_some() {
            self.persist_or_log(&table);
        }
        removed
    }

    /// Write the full table to disk, surfacing the error. Used on shutdown.
    pub async fn save_all(&self) -> Result<(), StoreError> {
        let table = self.table.read().await;
        self.write_snapshot(&table)
    }

    fn persist_or_log(&self, table: &BTreeMap<ScrimId, Scrim>) {
        if let Err(e) = self.write_snapshot(table) {
            error!(error = %e, "State write failed, continuing on in-memory table");
        }
    }

    /// Save the table to disk atomically (write to temp, rename).
    fn write_snapshot(&self, table: &BTreeMap<ScrimId, Scrim>) -> Result<(), StoreError> {
        let write_failed = |message: String| StoreError::WriteFailed {
            path: self.path.display().to_string(),
            message,
        };

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
            }
        }

        let snapshot = TableSnapshot {
            version: STATE_VERSION,
            scrims: table,
        };
        let content =
            serde_json::to_string_pretty(&snapshot).map_err(|e| write_failed(e.to_string()))?;

        // Write to temp file, then atomic rename
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &content).map_err(|e| write_failed(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| write_failed(e.to_string()))?;

        debug!(
            path = %self.path.display(),
            scrim_count = table.len(),
            "Saved state to disk"
        );

        Ok(())
    }
}
