//! Duplicate grouping.
//!
//! # Overview
//!
//! Items are partitioned in two tiers:
//!
//! 1. **Exact** - items sharing a fingerprint form a group.
//! 2. **Approximate** - items with *no* fingerprint are clustered by name
//!    similarity (see [`super::similarity`]). Items with a fingerprint never
//!    take part in name matching.
//!
//! Items are sorted by `item_id` before either tier runs, so unchanged input
//! always yields identical groups in identical order.
//!
//! # Example
//!
//! ```
//! use trackdedup::catalog::{CatalogEntry, MediaItem};
//! use trackdedup::duplicates::{group_items, GroupingConfig};
//!
//! let entries = ["Track (Remix)", "Track Remix"].iter().enumerate().map(|(i, name)| {
//!     CatalogEntry {
//!         id: format!("item{}", i),
//!         name: name.to_string(),
//!         path: format!("/music/{}.mp3", i).into(),
//!         tags: Default::default(),
//!         trashed: false,
//!     }
//! });
//! let items: Vec<MediaItem> = entries.filter_map(MediaItem::from_entry).collect();
//!
//! let (groups, stats) = group_items(&items, &GroupingConfig::default());
//! assert_eq!(groups.len(), 1);
//! assert_eq!(stats.approximate_groups, 1);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use super::similarity;
use crate::catalog::MediaItem;
use crate::fingerprint::Fingerprint;

/// How a group's members were matched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    /// Identical content fingerprint
    Exact {
        /// The shared fingerprint
        fingerprint: Fingerprint,
    },
    /// Similar display names (no fingerprint available)
    Approximate {
        /// Lowest pairwise score linking the group
        score: f64,
    },
}

impl MatchKind {
    /// Whether this group was matched by fingerprint.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact { .. })
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact { fingerprint } => write!(f, "exact {}", fingerprint.short()),
            Self::Approximate { score } => write!(f, "approximate {:.2}", score),
        }
    }
}

/// Two or more items believed to be the same recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// How members were matched
    pub match_kind: MatchKind,
    /// Members, sorted by `item_id`
    pub items: Vec<MediaItem>,
}

impl DuplicateGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Member ids in order.
    #[must_use]
    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.item_id.as_str()).collect()
    }
}

/// Grouper settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupingConfig {
    /// Minimum name similarity for approximate matches
    pub similarity_threshold: f64,
    /// Whether to run approximate matching at all
    pub fuzzy_fallback: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: similarity::DEFAULT_THRESHOLD,
            fuzzy_fallback: true,
        }
    }
}

impl GroupingConfig {
    /// Set the similarity threshold.
    #[must_use]
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Enable or disable approximate matching.
    #[must_use]
    pub fn with_fuzzy_fallback(mut self, enabled: bool) -> Self {
        self.fuzzy_fallback = enabled;
        self
    }
}

/// Statistics from one grouping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupingStats {
    /// Items considered
    pub total_items: usize,
    /// Items that had a fingerprint
    pub fingerprinted_items: usize,
    /// Groups matched by fingerprint
    pub exact_groups: usize,
    /// Groups matched by name
    pub approximate_groups: usize,
    /// Items placed in any group
    pub grouped_items: usize,
}

/// Group items sharing a fingerprint.
///
/// Groups are ordered by their first member's `item_id`.
#[must_use]
pub fn group_by_fingerprint(items: &[MediaItem]) -> Vec<DuplicateGroup> {
    let mut by_fp: BTreeMap<Fingerprint, Vec<&MediaItem>> = BTreeMap::new();
    for item in items {
        if let Some(fp) = item.fingerprint {
            by_fp.entry(fp).or_default().push(item);
        }
    }

    let mut groups: Vec<DuplicateGroup> = by_fp
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(fingerprint, members)| {
            let mut items: Vec<MediaItem> = members.into_iter().cloned().collect();
            items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
            DuplicateGroup {
                match_kind: MatchKind::Exact { fingerprint },
                items,
            }
        })
        .collect();
    groups.sort_by(|a, b| a.items[0].item_id.cmp(&b.items[0].item_id));
    groups
}

/// Cluster items *without* a fingerprint by name similarity.
#[must_use]
pub fn group_by_name(items: &[MediaItem], threshold: f64) -> Vec<DuplicateGroup> {
    let mut uncovered: Vec<&MediaItem> = items.iter().filter(|i| i.fingerprint.is_none()).collect();
    uncovered.sort_by(|a, b| a.item_id.cmp(&b.item_id));

    let names: Vec<String> = uncovered.iter().map(|i| i.name.clone()).collect();
    similarity::cluster(&names, threshold)
        .into_iter()
        .map(|cluster| DuplicateGroup {
            match_kind: MatchKind::Approximate {
                score: cluster.min_score,
            },
            items: cluster
                .members
                .iter()
                .map(|&idx| uncovered[idx].clone())
                .collect(),
        })
        .collect()
}

/// Partition a snapshot into duplicate groups: exact groups first, then
/// approximate groups when enabled.
#[must_use]
pub fn group_items(items: &[MediaItem], config: &GroupingConfig) -> (Vec<DuplicateGroup>, GroupingStats) {
    let mut stats = GroupingStats {
        total_items: items.len(),
        fingerprinted_items: items.iter().filter(|i| i.fingerprint.is_some()).count(),
        ..Default::default()
    };

    let mut groups = group_by_fingerprint(items);
    stats.exact_groups = groups.len();
    log::info!(
        "Exact matching complete: {} group(s) among {} fingerprinted item(s)",
        stats.exact_groups,
        stats.fingerprinted_items
    );

    if config.fuzzy_fallback {
        let approximate = group_by_name(items, config.similarity_threshold);
        stats.approximate_groups = approximate.len();
        log::info!(
            "Name matching complete: {} group(s) among {} item(s) without fingerprint",
            stats.approximate_groups,
            stats.total_items - stats.fingerprinted_items
        );
        groups.extend(approximate);
    } else {
        log::debug!("Name matching disabled");
    }

    stats.grouped_items = groups.iter().map(DuplicateGroup::len).sum();
    (groups, stats)
}
