//! End-of-run reports.
//!
//! Every pass ends with a [`RunReport`] that is enough to audit what would
//! happen (dry run) or what did happen (executed run): items scanned,
//! coverage before and after, the gate decision, every group with its keeper
//! and losers, sync and disposal tallies, and each per-item failure with its
//! reason.
//!
//! Reports render as colored text (yansi) or JSON (serde_json).
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "mode": "dry_run",
//!   "scanned": 5,
//!   "coverage_before": { "covered": 2, "total": 5 },
//!   "coverage_after": { "covered": 5, "total": 5 },
//!   "gate": { "decision": "proceed", "ratio": 1.0 },
//!   "groups": [ { "match_kind": { "kind": "exact", "fingerprint": "ab12..." }, "keeper": {}, "losers": [] } ],
//!   "failures": []
//! }
//! ```

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use yansi::Paint;

use crate::actions::{DisposalCounts, DisposeOutcome, SyncCounts};
use crate::catalog::{ContainerFormat, FingerprintSource, MediaItem};
use crate::duplicates::{Coverage, GateDecision, GroupingStats, KeeperReason, MatchKind};
use crate::fingerprint::{EmbedStatus, PipelineStats};

/// Whether a run was allowed to mutate anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Grouping and resolution only; no writes anywhere.
    DryRun,
    /// Embeds, tags, record updates and disposal were performed.
    Execute,
}

/// Stage at which a per-item failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Reading the file to compute its digest
    Fingerprint,
    /// Writing the digest into the file
    Embed,
    /// Adding the fingerprint tag in the catalog
    Tag,
    /// Mirroring the fingerprint into workspace records
    Record,
    /// Moving a loser to the trash
    Dispose,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fingerprint => "fingerprint",
            Self::Embed => "embed",
            Self::Tag => "tag",
            Self::Record => "record",
            Self::Dispose => "dispose",
        })
    }
}

/// One per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Catalog item id
    pub item_id: String,
    /// File path at snapshot time
    pub path: PathBuf,
    /// Where it failed
    pub stage: FailureStage,
    /// Why
    pub reason: String,
}

/// The identifying fields of an item, as shown in reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSummary {
    /// Catalog item id
    pub item_id: String,
    /// Display name
    pub name: String,
    /// File path
    pub path: PathBuf,
    /// Container format
    pub format: ContainerFormat,
    /// Modification time captured with the snapshot
    pub modified: Option<DateTime<Utc>>,
}

impl From<&MediaItem> for ItemSummary {
    fn from(item: &MediaItem) -> Self {
        Self {
            item_id: item.item_id.clone(),
            name: item.name.clone(),
            path: item.file_path.clone(),
            format: item.container_format,
            modified: item.modified,
        }
    }
}

/// A loser and, in an executed run, what disposal did with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoserReport {
    /// The item
    #[serde(flatten)]
    pub item: ItemSummary,
    /// Disposal outcome; `None` in a dry run
    pub disposal: Option<DisposeOutcome>,
}

/// One resolved duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    /// How the members were matched
    pub match_kind: MatchKind,
    /// The surviving item
    pub keeper: ItemSummary,
    /// Why it survived
    pub reason: KeeperReason,
    /// Items to relocate
    pub losers: Vec<LoserReport>,
}

/// Everything a deduplication pass did or would do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Dry run or executed
    pub mode: RunMode,
    /// Whether the run stopped early on Ctrl+C
    pub interrupted: bool,
    /// Items in the snapshot
    pub scanned: usize,
    /// Catalog entries skipped for an unknown file extension
    pub skipped_unknown: usize,
    /// Whether the listing returned exactly the configured limit
    pub listing_truncated: bool,
    /// Coverage from tags and embedded digests
    pub coverage_before: Coverage,
    /// Coverage after this run's fingerprinting
    pub coverage_after: Coverage,
    /// Gate decision on `coverage_after`
    pub gate: GateDecision,
    /// Fingerprint phase statistics
    pub fingerprinting: PipelineStats,
    /// Grouper statistics; `None` when the gate blocked
    pub grouping: Option<GroupingStats>,
    /// Resolved groups
    pub groups: Vec<GroupReport>,
    /// Tag and record sync tallies
    pub sync: SyncCounts,
    /// Disposal tallies
    pub disposal: DisposalCounts,
    /// Per-item failures
    pub failures: Vec<Failure>,
}

impl RunReport {
    /// Total losers across all groups.
    #[must_use]
    pub fn loser_count(&self) -> usize {
        self.groups.iter().map(|g| g.losers.len()).sum()
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty-printed JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_json<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writeln!(writer)?;
        Ok(())
    }

    /// Render the human-readable report.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mode = match self.mode {
            RunMode::DryRun => "DRY RUN".yellow().bold().to_string(),
            RunMode::Execute => "EXECUTE".red().bold().to_string(),
        };
        let _ = writeln!(out, "{} trackdedup run ({})", "==".dim(), mode);
        let _ = writeln!(
            out,
            "Scanned: {} item(s){}",
            self.scanned,
            if self.skipped_unknown > 0 {
                format!(", {} skipped (unknown format)", self.skipped_unknown)
            } else {
                String::new()
            }
        );
        if self.listing_truncated {
            let _ = writeln!(
                out,
                "{}",
                "Warning: catalog listing hit the configured limit; raise catalog.list_limit"
                    .yellow()
            );
        }
        let _ = writeln!(out, "Coverage before: {}", self.coverage_before);
        let _ = writeln!(out, "Coverage after:  {}", self.coverage_after);

        let stats = &self.fingerprinting;
        if stats.input_items > 0 {
            let _ = writeln!(
                out,
                "Fingerprinted: {} of {} ({} computed, {} already embedded, {} written, {} hashed)",
                stats.fingerprinted,
                stats.input_items,
                stats.computed,
                stats.from_embedded,
                stats.embedded_written,
                ByteSize::b(stats.bytes_hashed)
            );
        }

        let gate = match self.gate {
            GateDecision::Proceed { .. } => self.gate.to_string().green().to_string(),
            GateDecision::Blocked { .. } => self.gate.to_string().red().bold().to_string(),
        };
        let _ = writeln!(out, "Gate: {}", gate);
        if !self.gate.is_proceed() {
            let _ = writeln!(
                out,
                "Deduplication skipped; fingerprint {} more item(s) (e.g. run --limit N --execute).",
                self.coverage_after.uncovered()
            );
        }

        if !self.groups.is_empty() {
            let _ = writeln!(out);
            for (idx, group) in self.groups.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "Group {} [{}], {} member(s)",
                    idx + 1,
                    group.match_kind,
                    group.losers.len() + 1
                );
                let _ = writeln!(
                    out,
                    "  {} {} ({}, {}) {}",
                    "keep".green().bold(),
                    group.keeper.item_id,
                    group.keeper.format,
                    group.reason,
                    group.keeper.path.display()
                );
                for loser in &group.losers {
                    let verb = match &loser.disposal {
                        None => "drop".yellow().to_string(),
                        Some(DisposeOutcome::Relocated) => "trashed".red().to_string(),
                        Some(DisposeOutcome::AlreadyRelocated) => "already trashed".dim().to_string(),
                        Some(DisposeOutcome::Failed(_)) => "FAILED".red().bold().to_string(),
                    };
                    let _ = writeln!(
                        out,
                        "  {} {} ({}) {}",
                        verb,
                        loser.item.item_id,
                        loser.item.format,
                        loser.item.path.display()
                    );
                }
            }
        }

        let _ = writeln!(out);
        if let Some(grouping) = &self.grouping {
            let _ = writeln!(
                out,
                "Groups: {} exact, {} approximate; {} loser(s)",
                grouping.exact_groups,
                grouping.approximate_groups,
                self.loser_count()
            );
        }
        if self.mode == RunMode::Execute {
            let s = &self.sync;
            let _ = writeln!(
                out,
                "Tags: {} tagged, {} already tagged, {} failed",
                s.tagged, s.already_tagged, s.tag_failed
            );
            let _ = writeln!(
                out,
                "Records: {} updated, {} current, {} no match, {} failed",
                s.records_updated, s.records_current, s.no_match, s.record_failed
            );
            let d = &self.disposal;
            let _ = writeln!(
                out,
                "Disposal: {} relocated, {} already relocated, {} failed",
                d.relocated, d.already_relocated, d.failed
            );
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "{} ({}):", "Failures".red().bold(), self.failures.len());
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "  [{}] {} {}: {}",
                    failure.stage,
                    failure.item_id,
                    failure.path.display(),
                    failure.reason
                );
            }
        }
        if self.interrupted {
            let _ = writeln!(out, "{}", "Interrupted: the run stopped early.".yellow().bold());
        }
        let elapsed = self.finished_at - self.started_at;
        let _ = writeln!(out, "Finished in {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
        out
    }
}

/// Result of the `coverage` subcommand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    /// Items in the snapshot
    pub scanned: usize,
    /// Catalog entries skipped for an unknown file extension
    pub skipped_unknown: usize,
    /// Items covered by a tag
    pub from_tags: usize,
    /// Items covered by an embedded digest
    pub from_embedded: usize,
    /// Combined coverage
    pub coverage: Coverage,
    /// Gate decision
    pub gate: GateDecision,
    /// Whether probing stopped early on Ctrl+C
    pub interrupted: bool,
}

impl CoverageReport {
    /// Render the human-readable report.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scanned: {} item(s)", self.scanned);
        if self.skipped_unknown > 0 {
            let _ = writeln!(out, "Skipped (unknown format): {}", self.skipped_unknown);
        }
        let _ = writeln!(
            out,
            "Coverage: {} [{} tag, {} embedded]",
            self.coverage, self.from_tags, self.from_embedded
        );
        let gate = if self.gate.is_proceed() {
            self.gate.to_string().green().to_string()
        } else {
            self.gate.to_string().red().bold().to_string()
        };
        let _ = writeln!(out, "Gate: {}", gate);
        if self.interrupted {
            let _ = writeln!(out, "{}", "Interrupted: coverage is a lower bound.".yellow());
        }
        out
    }
}

/// One line of the `fingerprint` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    /// File path
    pub path: PathBuf,
    /// Hex digest, when established
    pub fingerprint: Option<String>,
    /// How it was established
    pub source: Option<FingerprintSource>,
    /// In-file slot status, or why the file was skipped
    pub status: String,
}

impl FileReport {
    /// Describe an embed status.
    #[must_use]
    pub fn embed_status(status: &EmbedStatus) -> String {
        use crate::fingerprint::EmbedOutcome;
        match status {
            EmbedStatus::Skipped => "not embedded (dry run)".to_string(),
            EmbedStatus::Present => "already embedded".to_string(),
            EmbedStatus::Outcome(EmbedOutcome::Written) => "embedded".to_string(),
            EmbedStatus::Outcome(EmbedOutcome::AlreadyPresent) => "already embedded".to_string(),
            EmbedStatus::Outcome(EmbedOutcome::Unsupported) => {
                "format cannot carry a fingerprint".to_string()
            }
            EmbedStatus::Failed(reason) => format!("embed failed: {}", reason),
        }
    }

    /// One line: `<hex>  <path>  (<status>)`.
    #[must_use]
    pub fn render_line(&self) -> String {
        match &self.fingerprint {
            Some(hex) => format!("{}  {}  ({})", hex, self.path.display(), self.status),
            None => format!(
                "{}  {}  ({})",
                "-".repeat(64).dim(),
                self.path.display(),
                self.status.as_str().red()
            ),
        }
    }
}
