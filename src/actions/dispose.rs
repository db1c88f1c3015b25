//! Relocating losers to the catalog's trash.
//!
//! # Safety
//!
//! Disposal is a move into the catalog application's trash, never a hard
//! delete: a relocated item stays retrievable there. The [`Disposer`]
//! remembers what it has relocated during the run, so a repeated request
//! for the same item makes no further API call.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::catalog::{CatalogApi, MediaItem, TrashOutcome};

/// Outcome of disposing one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DisposeOutcome {
    /// Moved to the trash by this call.
    Relocated,
    /// Already in the trash (this run or earlier).
    AlreadyRelocated,
    /// The move failed; the item is untouched.
    Failed(String),
}

/// Per-run disposal state.
pub struct Disposer<'a> {
    catalog: &'a dyn CatalogApi,
    relocated: BTreeSet<String>,
}

impl std::fmt::Debug for Disposer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("relocated", &self.relocated)
            .finish_non_exhaustive()
    }
}

impl<'a> Disposer<'a> {
    /// Create a disposer for one run.
    #[must_use]
    pub fn new(catalog: &'a dyn CatalogApi) -> Self {
        Self {
            catalog,
            relocated: BTreeSet::new(),
        }
    }

    /// Move `item` to the trash.
    pub fn dispose(&mut self, item: &MediaItem) -> DisposeOutcome {
        if self.relocated.contains(&item.item_id) {
            return DisposeOutcome::AlreadyRelocated;
        }
        match self.catalog.move_to_trash(&item.item_id) {
            Ok(outcome) => {
                self.relocated.insert(item.item_id.clone());
                match outcome {
                    TrashOutcome::Moved => {
                        log::info!(
                            "Moved {} to trash ({})",
                            item.item_id,
                            item.file_path.display()
                        );
                        DisposeOutcome::Relocated
                    }
                    TrashOutcome::AlreadyInTrash => {
                        log::debug!("Item {} was already in trash", item.item_id);
                        DisposeOutcome::AlreadyRelocated
                    }
                }
            }
            Err(e) => {
                log::warn!("Failed to move {} to trash: {}", item.item_id, e);
                DisposeOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Tallies of disposal outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisposalCounts {
    /// Items moved to the trash
    pub relocated: usize,
    /// Items already in the trash
    pub already_relocated: usize,
    /// Moves that failed
    pub failed: usize,
}

impl DisposalCounts {
    /// Count one outcome.
    pub fn add(&mut self, outcome: &DisposeOutcome) {
        match outcome {
            DisposeOutcome::Relocated => self.relocated += 1,
            DisposeOutcome::AlreadyRelocated => self.already_relocated += 1,
            DisposeOutcome::Failed(_) => self.failed += 1,
        }
    }
}
