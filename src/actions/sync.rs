//! Propagating fingerprints to the catalog and the workspace.
//!
//! Both operations are idempotent and never fail the batch: every problem is
//! reported as a `Failed` outcome with a reason, and the caller moves on to
//! the next item.
//!
//! # Example
//!
//! ```
//! use trackdedup::actions::sync::{sync_fingerprint, TagSyncOutcome};
//! use trackdedup::catalog::{CatalogEntry, FingerprintSource, InMemoryCatalog, MediaItem};
//! use trackdedup::fingerprint::Fingerprint;
//!
//! let entry = CatalogEntry {
//!     id: "a".into(),
//!     name: "Song".into(),
//!     path: "/music/a.flac".into(),
//!     tags: Default::default(),
//!     trashed: false,
//! };
//! let catalog = InMemoryCatalog::new(vec![entry.clone()]);
//! let mut item = MediaItem::from_entry(entry).unwrap();
//! item.set_fingerprint(Fingerprint::from_bytes([1; 32]), FingerprintSource::Computed);
//!
//! assert_eq!(sync_fingerprint(&catalog, &mut item), TagSyncOutcome::Tagged);
//! assert_eq!(sync_fingerprint(&catalog, &mut item), TagSyncOutcome::AlreadyTagged);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::{
    CatalogApi, MediaItem, RawRecord, RecordFilter, RecordSchema, TrackRecord, WorkspaceApi,
};
use crate::fingerprint::Fingerprint;

/// Outcome of [`sync_fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum TagSyncOutcome {
    /// The tag was added.
    Tagged,
    /// The tag was already present; no call was made.
    AlreadyTagged,
    /// The tag could not be added.
    Failed(String),
}

/// Outcome of [`sync_record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordSyncOutcome {
    /// Matching records had their fingerprint field set.
    Updated {
        /// Records written
        records: usize,
    },
    /// Every matching record already held this fingerprint.
    AlreadyCurrent,
    /// No record references the item's path.
    NoMatch,
    /// A query or update failed.
    Failed {
        /// Why
        reason: String,
    },
}

/// Ensure the catalog carries `fingerprint:<hex>` for `item`.
///
/// Other `fingerprint:`-prefixed tags (malformed or stale) are replaced so an
/// item carries exactly one. On success `item.tags` is updated to match the
/// catalog.
pub fn sync_fingerprint(catalog: &dyn CatalogApi, item: &mut MediaItem) -> TagSyncOutcome {
    let Some(fingerprint) = item.fingerprint else {
        return TagSyncOutcome::Failed("no fingerprint known".to_string());
    };
    if item.has_fingerprint_tag(&fingerprint) {
        log::trace!("Item {} already tagged", item.item_id);
        return TagSyncOutcome::AlreadyTagged;
    }

    let mut tags: std::collections::BTreeSet<String> = item
        .tags
        .iter()
        .filter(|t| !t.starts_with(Fingerprint::TAG_PREFIX))
        .cloned()
        .collect();
    tags.insert(fingerprint.to_tag());

    match catalog.update_tags(&item.item_id, &tags) {
        Ok(()) => {
            log::debug!("Tagged {} with {}", item.item_id, fingerprint.short());
            item.tags = tags;
            TagSyncOutcome::Tagged
        }
        Err(e) => {
            log::warn!("Failed to tag item {}: {}", item.item_id, e);
            TagSyncOutcome::Failed(e.to_string())
        }
    }
}

/// Mirror `item`'s fingerprint into every workspace record referencing its path.
///
/// Every declared path field is queried for the item's exact path; results
/// are merged by record id and re-checked against the typed view before any
/// write. Records already holding the digest are not written again.
pub fn sync_record(
    workspace: &dyn WorkspaceApi,
    schema: &RecordSchema,
    item: &MediaItem,
) -> RecordSyncOutcome {
    let Some(fingerprint) = item.fingerprint else {
        return RecordSyncOutcome::Failed {
            reason: "no fingerprint known".to_string(),
        };
    };
    let path = item.file_path.to_string_lossy().into_owned();

    let mut matches: BTreeMap<String, RawRecord> = BTreeMap::new();
    for field in schema.path_field_names() {
        let filter = RecordFilter {
            field: field.to_string(),
            equals: path.clone(),
        };
        match workspace.query(&filter) {
            Ok(records) => {
                for record in records {
                    matches.entry(record.id.clone()).or_insert(record);
                }
            }
            Err(e) => {
                log::warn!("Record lookup failed for {} ({}): {}", item.item_id, field, e);
                return RecordSyncOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }
    }

    let records: Vec<TrackRecord> = matches
        .values()
        .map(|raw| TrackRecord::from_raw(raw, schema))
        .filter(|record| record.references(&item.file_path))
        .collect();
    if records.is_empty() {
        log::trace!("No record references {}", path);
        return RecordSyncOutcome::NoMatch;
    }

    let mut fields = Map::new();
    fields.insert(
        schema.fingerprint_field.clone(),
        Value::String(fingerprint.to_hex()),
    );

    let mut updated = 0;
    for record in records.iter().filter(|r| r.fingerprint != Some(fingerprint)) {
        if let Err(e) = workspace.update_fields(&record.record_id, &fields) {
            log::warn!(
                "Failed to update record {} for {}: {}",
                record.record_id,
                item.item_id,
                e
            );
            return RecordSyncOutcome::Failed {
                reason: format!("record {}: {}", record.record_id, e),
            };
        }
        updated += 1;
    }

    if updated == 0 {
        RecordSyncOutcome::AlreadyCurrent
    } else {
        log::debug!("Updated {} record(s) for {}", updated, item.item_id);
        RecordSyncOutcome::Updated { records: updated }
    }
}

/// Tallies of sync outcomes over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Tags added
    pub tagged: usize,
    /// Tags already present
    pub already_tagged: usize,
    /// Tag updates that failed
    pub tag_failed: usize,
    /// Items whose records were updated
    pub records_updated: usize,
    /// Items whose records were already current
    pub records_current: usize,
    /// Items with no referencing record
    pub no_match: usize,
    /// Items whose record sync failed
    pub record_failed: usize,
}

impl SyncCounts {
    /// Count a tag outcome.
    pub fn add_tag(&mut self, outcome: &TagSyncOutcome) {
        match outcome {
            TagSyncOutcome::Tagged => self.tagged += 1,
            TagSyncOutcome::AlreadyTagged => self.already_tagged += 1,
            TagSyncOutcome::Failed(_) => self.tag_failed += 1,
        }
    }

    /// Count a record outcome.
    pub fn add_record(&mut self, outcome: &RecordSyncOutcome) {
        match outcome {
            RecordSyncOutcome::Updated { .. } => self.records_updated += 1,
            RecordSyncOutcome::AlreadyCurrent => self.records_current += 1,
            RecordSyncOutcome::NoMatch => self.no_match += 1,
            RecordSyncOutcome::Failed { .. } => self.record_failed += 1,
        }
    }
}
