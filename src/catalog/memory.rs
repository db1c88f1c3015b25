//! In-memory catalog and workspace backends.
//!
//! Used for offline runs against a JSON snapshot (`run --snapshot FILE`) and
//! as controllable test doubles: call counters, injected transient failures,
//! and an "unreachable" switch.
//!
//! # Snapshot format
//!
//! ```json
//! {
//!   "items":   [{ "id": "a1", "name": "Track", "path": "/music/track.flac", "tags": [] }],
//!   "records": [{ "id": "r1", "fields": { "FLAC Path": "/music/track.flac" } }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    ApiError, CatalogApi, CatalogEntry, RawRecord, RecordFilter, TrashOutcome, WorkspaceApi,
};

/// Errors loading a snapshot file.
#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    /// The file could not be read.
    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        /// Snapshot path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid snapshot document.
    #[error("Invalid snapshot {path}: {source}")]
    Parse {
        /// Snapshot path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Frozen contents of both external systems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Catalog items
    #[serde(default)]
    pub items: Vec<CatalogEntry>,
    /// Workspace records
    #[serde(default)]
    pub records: Vec<RawRecord>,
}

impl Snapshot {
    /// Load a snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SnapshotError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared failure switches for both backends.
#[derive(Debug, Default)]
struct Faults {
    unreachable: AtomicBool,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

impl Faults {
    fn check(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable("connection refused".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(ApiError::Unavailable("injected transient failure".to_string()));
        }
        Ok(())
    }
}

/// Catalog backend holding entries in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: Mutex<BTreeMap<String, CatalogEntry>>,
    missing: Mutex<BTreeSet<String>>,
    tag_updates: AtomicUsize,
    trash_calls: AtomicUsize,
    faults: Faults,
}

impl InMemoryCatalog {
    /// Create a catalog from entries (later duplicates of an id win).
    #[must_use]
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().map(|e| (e.id.clone(), e)).collect()),
            ..Self::default()
        }
    }

    /// Current state of one entry, including trashed ones.
    #[must_use]
    pub fn entry(&self, item_id: &str) -> Option<CatalogEntry> {
        lock(&self.entries).get(item_id).cloned()
    }

    /// All entries, including trashed ones, in id order.
    #[must_use]
    pub fn entries(&self) -> Vec<CatalogEntry> {
        lock(&self.entries).values().cloned().collect()
    }

    /// Make every call fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next_calls(&self, n: usize) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make mutations of `item_id` fail as if the item vanished.
    pub fn forget_item(&self, item_id: &str) {
        lock(&self.missing).insert(item_id.to_string());
    }

    /// Total calls received, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    /// Successful tag updates.
    #[must_use]
    pub fn tag_update_count(&self) -> usize {
        self.tag_updates.load(Ordering::SeqCst)
    }

    /// Trash calls that reached an existing item.
    #[must_use]
    pub fn trash_call_count(&self) -> usize {
        self.trash_calls.load(Ordering::SeqCst)
    }

    fn ensure_known(&self, item_id: &str) -> Result<(), ApiError> {
        if lock(&self.missing).contains(item_id) {
            return Err(ApiError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }
}

impl CatalogApi for InMemoryCatalog {
    fn list_items(&self, limit: usize) -> Result<Vec<CatalogEntry>, ApiError> {
        self.faults.check()?;
        Ok(lock(&self.entries)
            .values()
            .filter(|e| !e.trashed)
            .take(limit)
            .cloned()
            .collect())
    }

    fn update_tags(&self, item_id: &str, tags: &BTreeSet<String>) -> Result<(), ApiError> {
        self.faults.check()?;
        self.ensure_known(item_id)?;
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(item_id)
            .ok_or_else(|| ApiError::NotFound(format!("item {}", item_id)))?;
        entry.tags = tags.clone();
        self.tag_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn move_to_trash(&self, item_id: &str) -> Result<TrashOutcome, ApiError> {
        self.faults.check()?;
        self.ensure_known(item_id)?;
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(item_id)
            .ok_or_else(|| ApiError::NotFound(format!("item {}", item_id)))?;
        self.trash_calls.fetch_add(1, Ordering::SeqCst);
        if entry.trashed {
            return Ok(TrashOutcome::AlreadyInTrash);
        }
        entry.trashed = true;
        Ok(TrashOutcome::Moved)
    }
}

/// Workspace backend holding records in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    records: Mutex<Vec<RawRecord>>,
    updates: AtomicUsize,
    faults: Faults,
}

impl InMemoryWorkspace {
    /// Create a workspace from records.
    #[must_use]
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Current state of one record.
    #[must_use]
    pub fn record(&self, record_id: &str) -> Option<RawRecord> {
        lock(&self.records).iter().find(|r| r.id == record_id).cloned()
    }

    /// Make every call fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next_calls(&self, n: usize) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total calls received, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    /// Successful field updates.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl WorkspaceApi for InMemoryWorkspace {
    fn query(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, ApiError> {
        self.faults.check()?;
        Ok(lock(&self.records)
            .iter()
            .filter(|r| {
                r.fields.get(&filter.field).and_then(Value::as_str) == Some(filter.equals.as_str())
            })
            .cloned()
            .collect())
    }

    fn update_fields(&self, record_id: &str, fields: &Map<String, Value>) -> Result<(), ApiError> {
        self.faults.check()?;
        let mut records = lock(&self.records);
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| ApiError::NotFound(format!("record {}", record_id)))?;
        for (key, value) in fields {
            record.fields.insert(key.clone(), value.clone());
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
