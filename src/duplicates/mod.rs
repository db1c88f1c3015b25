//! Duplicate detection.
//!
//! This module provides:
//! - Coverage measurement and the coverage gate ([`coverage`])
//! - Exact and approximate grouping ([`groups`], [`similarity`])
//! - Keeper resolution ([`keeper`])

pub mod coverage;
pub mod groups;
pub mod keeper;
pub mod similarity;

pub use coverage::{gate, measure, Coverage, GateDecision};
pub use groups::{
    group_by_fingerprint, group_by_name, group_items, DuplicateGroup, GroupingConfig,
    GroupingStats, MatchKind,
};
pub use keeper::{compare, format_rank, resolve, KeeperReason, Resolution};
