//! Catalog data model and the seams to the two external systems of record.
//!
//! # Overview
//!
//! The engine consumes two request/response services through narrow traits:
//!
//! - [`CatalogApi`]: the catalog application holding imported media items
//!   (listing, tag mutation, trash).
//! - [`WorkspaceApi`]: the workspace database holding one loosely typed record
//!   per track (filtered query, field update).
//!
//! Raw payloads ([`CatalogEntry`], [`RawRecord`]) are converted once per run
//! into typed views ([`MediaItem`], [`TrackRecord`]) so matching logic never
//! performs ad hoc field lookups.
//!
//! # Submodules
//!
//! - [`http`]: blocking HTTP backends with per-request timeouts
//! - [`retry`]: bounded retry with exponential backoff, as a decorator
//! - [`memory`]: in-memory backends (offline snapshots and test doubles)

pub mod http;
pub mod memory;
pub mod retry;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fingerprint::Fingerprint;

pub use http::{HttpCatalog, HttpWorkspace};
pub use memory::{InMemoryCatalog, InMemoryWorkspace, Snapshot, SnapshotError};
pub use retry::{with_retry, RetryPolicy, Retrying};

/// Audio container formats the engine understands.
///
/// The set is closed: files with any other extension are not catalog items
/// as far as deduplication is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// AIFF / AIFC (lossless, chunked)
    Aiff,
    /// MP4 / M4A carrying ALAC (lossless, atom based)
    Mp4,
    /// MPEG layer III (compressed)
    Mp3,
    /// FLAC (open lossless)
    Flac,
    /// RIFF WAVE (raw PCM)
    Wav,
}

impl ContainerFormat {
    /// All formats, in declaration order.
    pub const ALL: [ContainerFormat; 5] = [
        ContainerFormat::Aiff,
        ContainerFormat::Mp4,
        ContainerFormat::Mp3,
        ContainerFormat::Flac,
        ContainerFormat::Wav,
    ];

    /// Infer the container format from a file extension (case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "aif" | "aiff" | "aifc" => Some(Self::Aiff),
            "m4a" | "mp4" | "alac" => Some(Self::Mp4),
            "mp3" => Some(Self::Mp3),
            "flac" => Some(Self::Flac),
            "wav" | "wave" => Some(Self::Wav),
            _ => None,
        }
    }

    /// Infer the container format from a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the format's metadata model can carry an in-file fingerprint.
    #[must_use]
    pub fn supports_embedding(self) -> bool {
        !matches!(self, Self::Wav)
    }

    /// Short lowercase name, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aiff => "aiff",
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item's fingerprint became known during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintSource {
    /// A `fingerprint:<hex>` tag in the catalog application.
    Tag,
    /// A digest extracted from the file's metadata container.
    Embedded,
    /// Computed from file bytes during this run.
    Computed,
}

/// An item exactly as the catalog application returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Opaque identifier assigned by the catalog application
    pub id: String,
    /// Display name (track title)
    #[serde(default)]
    pub name: String,
    /// Absolute path of the file on disk
    pub path: PathBuf,
    /// Tags attached to the item
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Whether the item already sits in the catalog's trash
    #[serde(default)]
    pub trashed: bool,
}

/// One physical audio file as known to the catalog application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Opaque identifier assigned by the catalog application
    pub item_id: String,
    /// Display name used by the approximate matcher
    pub name: String,
    /// Absolute path of the file on disk (may be stale)
    pub file_path: PathBuf,
    /// Container format inferred from the file extension
    pub container_format: ContainerFormat,
    /// Tags attached in the catalog application
    pub tags: BTreeSet<String>,
    /// Filesystem modification time captured with the snapshot
    pub modified: Option<DateTime<Utc>>,
    /// Content fingerprint, once known
    pub fingerprint: Option<Fingerprint>,
    /// Channel through which the fingerprint became known
    pub fingerprint_source: Option<FingerprintSource>,
}

impl MediaItem {
    /// Build a typed item from a catalog entry.
    ///
    /// Returns `None` when the file extension is not a known container format.
    /// A well-formed `fingerprint:<hex>` tag sets the fingerprint; a malformed
    /// one is ignored.
    #[must_use]
    pub fn from_entry(entry: CatalogEntry) -> Option<Self> {
        let container_format = ContainerFormat::from_path(&entry.path)?;
        let fingerprint = fingerprint_from_tags(&entry.tags);
        let name = if entry.name.trim().is_empty() {
            entry
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            entry.name
        };

        Some(Self {
            item_id: entry.id,
            name,
            file_path: entry.path,
            container_format,
            tags: entry.tags,
            modified: None,
            fingerprint_source: fingerprint.map(|_| FingerprintSource::Tag),
            fingerprint,
        })
    }

    /// Read the file's modification time from the filesystem.
    ///
    /// Leaves `modified` as `None` if the file cannot be stat'ed; the keeper
    /// resolver treats that as the oldest possible time.
    pub fn capture_modified(&mut self) {
        self.modified = std::fs::metadata(&self.file_path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
    }

    /// Record a fingerprint learned through `source`.
    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint, source: FingerprintSource) {
        self.fingerprint = Some(fingerprint);
        self.fingerprint_source = Some(source);
    }

    /// Whether the catalog already carries the tag for `fingerprint`.
    #[must_use]
    pub fn has_fingerprint_tag(&self, fingerprint: &Fingerprint) -> bool {
        self.tags.contains(&fingerprint.to_tag())
    }
}

/// Parse the first well-formed fingerprint tag in a tag set.
fn fingerprint_from_tags(tags: &BTreeSet<String>) -> Option<Fingerprint> {
    let mut found = None;
    for tag in tags.iter().filter(|t| t.starts_with(Fingerprint::TAG_PREFIX)) {
        match Fingerprint::from_tag(tag) {
            Some(fp) if found.is_none() => found = Some(fp),
            Some(_) => log::warn!("Multiple fingerprint tags present, keeping the first: {}", tag),
            None => log::warn!("Ignoring malformed fingerprint tag: {}", tag),
        }
    }
    found
}

/// Outcome of moving an item to the catalog's trash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashOutcome {
    /// The item was moved to the trash by this call.
    Moved,
    /// The item was already in the trash.
    AlreadyInTrash,
}

/// A record exactly as the workspace database returns it: an id plus
/// arbitrary named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Record identifier
    pub id: String,
    /// Field name to value
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Equality filter on one record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Field name
    pub field: String,
    /// Value the field must equal
    pub equals: String,
}

/// The declared subset of workspace fields the engine recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Field holding the mirrored fingerprint (hex)
    pub fingerprint_field: String,
    /// Path field per container format
    pub path_fields: BTreeMap<ContainerFormat, String>,
}

impl Default for RecordSchema {
    fn default() -> Self {
        let path_fields = [
            (ContainerFormat::Aiff, "AIFF Path"),
            (ContainerFormat::Mp4, "ALAC Path"),
            (ContainerFormat::Mp3, "MP3 Path"),
            (ContainerFormat::Flac, "FLAC Path"),
            (ContainerFormat::Wav, "WAV Path"),
        ]
        .into_iter()
        .map(|(format, field)| (format, field.to_string()))
        .collect();

        Self {
            fingerprint_field: "Fingerprint".to_string(),
            path_fields,
        }
    }
}

impl RecordSchema {
    /// Distinct path field names, in format order.
    #[must_use]
    pub fn path_field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.path_fields.values() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

/// Typed view of a workspace record.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    /// Record identifier
    pub record_id: String,
    /// Recorded file path per container format
    pub paths: BTreeMap<ContainerFormat, PathBuf>,
    /// Mirrored fingerprint, if present and well formed
    pub fingerprint: Option<Fingerprint>,
}

impl TrackRecord {
    /// Project a raw record through the schema.
    ///
    /// Unrecognized fields are ignored; empty or non-string path values are
    /// treated as absent.
    #[must_use]
    pub fn from_raw(raw: &RawRecord, schema: &RecordSchema) -> Self {
        let paths = schema
            .path_fields
            .iter()
            .filter_map(|(format, field)| {
                raw.fields
                    .get(field)
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| (*format, PathBuf::from(s)))
            })
            .collect();

        let fingerprint = raw
            .fields
            .get(&schema.fingerprint_field)
            .and_then(Value::as_str)
            .and_then(|s| Fingerprint::from_hex(s.trim()));

        Self {
            record_id: raw.id.clone(),
            paths,
            fingerprint,
        }
    }

    /// Whether any recorded path equals `path`.
    #[must_use]
    pub fn references(&self, path: &Path) -> bool {
        self.paths.values().any(|p| p == path)
    }
}

/// Errors from either external system.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The service could not be reached, timed out, or reported a transient failure.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The addressed item or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service rejected the request.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP-style status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The catalog application's request/response API.
pub trait CatalogApi: Send + Sync {
    /// List up to `limit` items.
    fn list_items(&self, limit: usize) -> Result<Vec<CatalogEntry>, ApiError>;

    /// Replace an item's tag set.
    fn update_tags(&self, item_id: &str, tags: &BTreeSet<String>) -> Result<(), ApiError>;

    /// Move an item to the catalog's trash (never a hard delete).
    fn move_to_trash(&self, item_id: &str) -> Result<TrashOutcome, ApiError>;
}

/// The workspace database's structured-record API.
pub trait WorkspaceApi: Send + Sync {
    /// Records matching an equality filter.
    fn query(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, ApiError>;

    /// Set the given fields on a record.
    fn update_fields(&self, record_id: &str, fields: &Map<String, Value>) -> Result<(), ApiError>;
}

impl<T: CatalogApi + ?Sized> CatalogApi for std::sync::Arc<T> {
    fn list_items(&self, limit: usize) -> Result<Vec<CatalogEntry>, ApiError> {
        (**self).list_items(limit)
    }

    fn update_tags(&self, item_id: &str, tags: &BTreeSet<String>) -> Result<(), ApiError> {
        (**self).update_tags(item_id, tags)
    }

    fn move_to_trash(&self, item_id: &str) -> Result<TrashOutcome, ApiError> {
        (**self).move_to_trash(item_id)
    }
}

impl<T: WorkspaceApi + ?Sized> WorkspaceApi for std::sync::Arc<T> {
    fn query(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, ApiError> {
        (**self).query(filter)
    }

    fn update_fields(&self, record_id: &str, fields: &Map<String, Value>) -> Result<(), ApiError> {
        (**self).update_fields(record_id, fields)
    }
}
