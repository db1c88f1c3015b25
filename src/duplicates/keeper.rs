//! Keeper resolution: which member of a duplicate group survives.
//!
//! Members are ordered by a strict total comparator:
//!
//! 1. container fidelity (FLAC > WAV > AIFF = MP4 > MP3)
//! 2. later modification time (unknown sorts as oldest)
//! 3. lower `item_id`
//!
//! The first member is the keeper. Resolution is pure: it never touches the
//! filesystem or either external system.

use std::cmp::Ordering;

use serde::Serialize;

use crate::catalog::{ContainerFormat, MediaItem};

/// Fidelity rank of a container format; higher is better.
#[must_use]
pub fn format_rank(format: ContainerFormat) -> u8 {
    match format {
        ContainerFormat::Flac => 4,
        ContainerFormat::Wav => 3,
        ContainerFormat::Aiff | ContainerFormat::Mp4 => 2,
        ContainerFormat::Mp3 => 1,
    }
}

/// Order two items by keeper preference (`Less` means `a` is preferred).
#[must_use]
pub fn compare(a: &MediaItem, b: &MediaItem) -> Ordering {
    format_rank(b.container_format)
        .cmp(&format_rank(a.container_format))
        .then_with(|| b.modified.cmp(&a.modified))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Which rule separated the keeper from the runner-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperReason {
    /// Higher-fidelity container format
    Format,
    /// More recently modified
    Recency,
    /// Lowest item id (all else equal)
    ItemId,
}

impl std::fmt::Display for KeeperReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Format => "higher-fidelity format",
            Self::Recency => "most recently modified",
            Self::ItemId => "lowest item id",
        })
    }
}

/// Keeper and losers of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// The surviving item
    pub keeper: MediaItem,
    /// Items to dispose, in preference order
    pub losers: Vec<MediaItem>,
    /// Why the keeper beat the runner-up
    pub reason: KeeperReason,
}

/// Split group members into keeper and losers.
///
/// Returns `None` for groups with fewer than two members.
#[must_use]
pub fn resolve(members: &[MediaItem]) -> Option<Resolution> {
    if members.len() < 2 {
        return None;
    }
    let mut ordered: Vec<MediaItem> = members.to_vec();
    ordered.sort_by(compare);

    let reason = reason(&ordered[0], &ordered[1]);
    let mut iter = ordered.into_iter();
    let keeper = iter.next()?;
    let losers: Vec<MediaItem> = iter.collect();

    log::debug!(
        "Keeper {} ({}), {} loser(s), {}",
        keeper.item_id,
        keeper.container_format,
        losers.len(),
        reason
    );
    Some(Resolution {
        keeper,
        losers,
        reason,
    })
}

fn reason(keeper: &MediaItem, runner_up: &MediaItem) -> KeeperReason {
    if format_rank(keeper.container_format) != format_rank(runner_up.container_format) {
        KeeperReason::Format
    } else if keeper.modified != runner_up.modified {
        KeeperReason::Recency
    } else {
        KeeperReason::ItemId
    }
}
