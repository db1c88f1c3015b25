//! Mutating actions against the external systems.
//!
//! This module provides:
//! - Fingerprint propagation to catalog tags and workspace records ([`sync`])
//! - Loser relocation to the catalog's trash ([`dispose`])
//!
//! Every action returns an outcome value instead of an error so a batch
//! always runs to completion; failures are collected for the run report.
//!
//! ```no_run
//! use trackdedup::actions::dispose::{DisposalCounts, Disposer};
//! use trackdedup::catalog::{InMemoryCatalog, MediaItem};
//!
//! let catalog = InMemoryCatalog::new(Vec::new());
//! let mut disposer = Disposer::new(&catalog);
//! let losers: Vec<MediaItem> = Vec::new();
//! let mut counts = DisposalCounts::default();
//! for loser in &losers {
//!     counts.add(&disposer.dispose(loser));
//! }
//! assert_eq!(counts, DisposalCounts::default());
//! ```

pub mod dispose;
pub mod sync;

pub use dispose::{DisposalCounts, DisposeOutcome, Disposer};
pub use sync::{sync_fingerprint, sync_record, RecordSyncOutcome, SyncCounts, TagSyncOutcome};
