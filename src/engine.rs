//! One deduplication pass over a single catalog snapshot.
//!
//! # Overview
//!
//! [`DedupEngine::run`] executes the phases in order, each over the same
//! snapshot fetched at the start:
//!
//! 1. **Snapshot** - list catalog items once, keep known formats, sort by id
//! 2. **Probe** - extract embedded digests for items without a tag
//! 3. **Fingerprint** - compute (and, when executing, embed) digests for up
//!    to `fingerprint_limit` uncovered items
//! 4. **Gate** - measure coverage and decide whether grouping may run
//! 5. **Sync** - when executing, propagate every known fingerprint to tags
//!    and workspace records, even if the gate blocked
//! 6. **Group, resolve, dispose** - only when the gate proceeds; disposal
//!    only when executing
//!
//! Per-item failures are collected into the [`RunReport`]; only failing to
//! fetch the snapshot aborts the run.
//!
//! # Example
//!
//! ```no_run
//! use trackdedup::catalog::{InMemoryCatalog, InMemoryWorkspace, RecordSchema};
//! use trackdedup::engine::{DedupEngine, EngineConfig};
//!
//! let catalog = InMemoryCatalog::new(Vec::new());
//! let workspace = InMemoryWorkspace::new(Vec::new());
//! let engine = DedupEngine::new(&catalog, &workspace, RecordSchema::default(), EngineConfig::default());
//! let report = engine.run().unwrap();
//! println!("{}", report.render_text());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::actions::{
    sync_fingerprint, sync_record, DisposalCounts, DisposeOutcome, Disposer, RecordSyncOutcome,
    SyncCounts, TagSyncOutcome,
};
use crate::catalog::{
    ApiError, CatalogApi, FingerprintSource, MediaItem, RecordSchema, WorkspaceApi,
};
use crate::duplicates::{self, GateDecision, GroupingConfig};
use crate::fingerprint::{EmbedStatus, FingerprintPipeline, PipelineConfig, PipelineStats};
use crate::progress::ProgressCallback;
use crate::report::{
    CoverageReport, Failure, FailureStage, GroupReport, ItemSummary, LoserReport, RunMode,
    RunReport,
};

/// Errors that abort a run.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The initial catalog listing failed; there is nothing to operate on.
    #[error("Failed to fetch catalog snapshot: {0}")]
    Snapshot(#[source] ApiError),

    /// Shutdown was requested before any work started.
    #[error("Run interrupted by user")]
    Interrupted,
}

/// Settings for one pass.
#[derive(Clone)]
pub struct EngineConfig {
    /// Perform mutations (embed, tag, record update, trash)
    pub execute: bool,
    /// Listing limit passed to the catalog
    pub list_limit: usize,
    /// Fingerprint at most this many uncovered items
    pub fingerprint_limit: Option<usize>,
    /// Minimum coverage ratio
    pub coverage_threshold: f64,
    /// Whether the gate is enforced
    pub coverage_required: bool,
    /// Grouper settings
    pub grouping: GroupingConfig,
    /// Fingerprint worker threads
    pub io_threads: usize,
    /// Optional shutdown flag for cooperative cancellation
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("execute", &self.execute)
            .field("list_limit", &self.list_limit)
            .field("fingerprint_limit", &self.fingerprint_limit)
            .field("coverage_threshold", &self.coverage_threshold)
            .field("coverage_required", &self.coverage_required)
            .field("grouping", &self.grouping)
            .field("io_threads", &self.io_threads)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execute: false,
            list_limit: 20_000,
            fingerprint_limit: None,
            coverage_threshold: duplicates::coverage::DEFAULT_THRESHOLD,
            coverage_required: true,
            grouping: GroupingConfig::default(),
            io_threads: 4,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl EngineConfig {
    /// Enable or disable mutations.
    #[must_use]
    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    /// Set the catalog listing limit.
    #[must_use]
    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit.max(1);
        self
    }

    /// Cap the number of items fingerprinted in this pass.
    #[must_use]
    pub fn with_fingerprint_limit(mut self, limit: Option<usize>) -> Self {
        self.fingerprint_limit = limit;
        self
    }

    /// Set the coverage gate.
    #[must_use]
    pub fn with_coverage_gate(mut self, threshold: f64, required: bool) -> Self {
        self.coverage_threshold = threshold;
        self.coverage_required = required;
        self
    }

    /// Set the grouper settings.
    #[must_use]
    pub fn with_grouping(mut self, grouping: GroupingConfig) -> Self {
        self.grouping = grouping;
        self
    }

    /// Set the worker count (minimum 1).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the shutdown flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn pipeline(&self) -> FingerprintPipeline {
        let mut config = PipelineConfig::default()
            .with_io_threads(self.io_threads)
            .with_embed(self.execute);
        if let Some(flag) = &self.shutdown_flag {
            config = config.with_shutdown_flag(Arc::clone(flag));
        }
        if let Some(callback) = &self.progress_callback {
            config = config.with_progress_callback(Arc::clone(callback));
        }
        FingerprintPipeline::new(config)
    }
}

/// Catalog items as of the start of a run.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    /// Items with a known container format, sorted by id
    pub items: Vec<MediaItem>,
    /// Entries skipped for an unknown extension
    pub skipped_unknown: usize,
    /// Whether the listing returned as many entries as the limit allowed
    pub truncated: bool,
}

/// Runs deduplication passes against the two external systems.
pub struct DedupEngine<'a> {
    catalog: &'a dyn CatalogApi,
    workspace: &'a dyn WorkspaceApi,
    schema: RecordSchema,
    config: EngineConfig,
}

impl<'a> DedupEngine<'a> {
    /// Create an engine over the given backends.
    #[must_use]
    pub fn new(
        catalog: &'a dyn CatalogApi,
        workspace: &'a dyn WorkspaceApi,
        schema: RecordSchema,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            workspace,
            schema,
            config,
        }
    }

    /// The engine's settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetch and type the catalog snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Snapshot`] if the listing fails after retries,
    /// or [`EngineError::Interrupted`] if shutdown was already requested.
    pub fn snapshot(&self) -> Result<CatalogSnapshot, EngineError> {
        if self.config.is_shutdown_requested() {
            return Err(EngineError::Interrupted);
        }
        let limit = self.config.list_limit;
        log::info!("Fetching catalog snapshot (limit {})", limit);
        let entries = self
            .catalog
            .list_items(limit)
            .map_err(EngineError::Snapshot)?;

        let truncated = entries.len() >= limit;
        if truncated {
            log::warn!(
                "Catalog listing returned {} items, the configured limit; items past it are not deduplicated",
                entries.len()
            );
        }

        let mut snapshot = CatalogSnapshot {
            truncated,
            ..Default::default()
        };
        let mut seen = BTreeSet::new();
        for entry in entries {
            if entry.trashed {
                log::trace!("Skipping trashed item {}", entry.id);
                continue;
            }
            if !seen.insert(entry.id.clone()) {
                log::warn!("Catalog listed item {} twice; keeping the first", entry.id);
                continue;
            }
            let path = entry.path.clone();
            match MediaItem::from_entry(entry) {
                Some(mut item) => {
                    item.capture_modified();
                    snapshot.items.push(item);
                }
                None => {
                    log::debug!("Skipping unknown format: {}", path.display());
                    snapshot.skipped_unknown += 1;
                }
            }
        }
        snapshot.items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        log::info!(
            "Snapshot: {} item(s), {} skipped (unknown format)",
            snapshot.items.len(),
            snapshot.skipped_unknown
        );
        Ok(snapshot)
    }

    /// Snapshot, probe, and evaluate the gate without grouping or writing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the snapshot cannot be fetched.
    pub fn coverage(&self) -> Result<CoverageReport, EngineError> {
        let mut snapshot = self.snapshot()?;
        let from_tags = duplicates::measure(&snapshot.items).covered;
        let interrupted = self.probe(&mut snapshot.items);
        let coverage = duplicates::measure(&snapshot.items);
        let gate = duplicates::gate(
            coverage.ratio(),
            self.config.coverage_threshold,
            self.config.coverage_required,
        );
        Ok(CoverageReport {
            scanned: snapshot.items.len(),
            skipped_unknown: snapshot.skipped_unknown,
            from_tags,
            from_embedded: coverage.covered - from_tags,
            coverage,
            gate,
            interrupted,
        })
    }

    /// Run a full pass.
    ///
    /// An interrupt after the snapshot still yields a report, marked
    /// `interrupted`, covering the phases that completed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the snapshot cannot be fetched.
    pub fn run(&self) -> Result<RunReport, EngineError> {
        let started_at = Utc::now();
        let snapshot = self.snapshot()?;
        let mut items = snapshot.items;

        let mut report = RunReport {
            started_at,
            finished_at: started_at,
            mode: if self.config.execute {
                RunMode::Execute
            } else {
                RunMode::DryRun
            },
            interrupted: false,
            scanned: items.len(),
            skipped_unknown: snapshot.skipped_unknown,
            listing_truncated: snapshot.truncated,
            coverage_before: Default::default(),
            coverage_after: Default::default(),
            gate: GateDecision::Blocked {
                ratio: 0.0,
                threshold: self.config.coverage_threshold,
            },
            fingerprinting: PipelineStats::default(),
            grouping: None,
            groups: Vec::new(),
            sync: SyncCounts::default(),
            disposal: DisposalCounts::default(),
            failures: Vec::new(),
        };

        report.interrupted = self.probe(&mut items);
        report.coverage_before = duplicates::measure(&items);
        log::info!("Coverage before fingerprinting: {}", report.coverage_before);

        if !report.interrupted {
            let (stats, failures) = self.fingerprint(&mut items);
            report.interrupted = stats.interrupted;
            report.fingerprinting = stats;
            report.failures.extend(failures);
        }

        report.coverage_after = duplicates::measure(&items);
        report.gate = duplicates::gate(
            report.coverage_after.ratio(),
            self.config.coverage_threshold,
            self.config.coverage_required,
        );
        log::info!(
            "Coverage after fingerprinting: {}; gate: {}",
            report.coverage_after,
            report.gate
        );

        if self.config.execute && !report.interrupted {
            report.interrupted = self.sync(&mut items, &mut report);
        }

        if report.interrupted {
            log::info!("Stopping before grouping: interrupted");
        } else if report.gate.is_proceed() {
            self.deduplicate(&items, &mut report);
        } else {
            log::warn!(
                "Deduplication blocked by coverage gate: {}",
                report.gate
            );
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Extract embedded digests for items without a tag. Returns whether the
    /// phase was interrupted.
    fn probe(&self, items: &mut [MediaItem]) -> bool {
        let targets: Vec<&MediaItem> = items.iter().filter(|i| i.fingerprint.is_none()).collect();
        let (results, interrupted) = self.config.pipeline().probe(&targets);

        let index = id_index(items);
        for result in results {
            if let (Some(fingerprint), Some(&idx)) = (result.fingerprint, index.get(&result.item_id)) {
                items[idx].set_fingerprint(fingerprint, FingerprintSource::Embedded);
            }
        }
        interrupted
    }

    /// Establish fingerprints for up to `fingerprint_limit` uncovered items.
    fn fingerprint(&self, items: &mut [MediaItem]) -> (PipelineStats, Vec<Failure>) {
        let limit = self.config.fingerprint_limit.unwrap_or(usize::MAX);
        let targets: Vec<&MediaItem> = items
            .iter()
            .filter(|i| i.fingerprint.is_none())
            .take(limit)
            .collect();
        let (results, stats) = self.config.pipeline().fingerprint(&targets);

        let index = id_index(items);
        let mut failures = Vec::new();
        for work in results {
            let Some(&idx) = index.get(&work.item_id) else {
                continue;
            };
            match work.result {
                Ok(done) => {
                    if let EmbedStatus::Failed(reason) = &done.embed {
                        failures.push(Failure {
                            item_id: work.item_id.clone(),
                            path: work.path.clone(),
                            stage: FailureStage::Embed,
                            reason: reason.clone(),
                        });
                    }
                    items[idx].set_fingerprint(done.fingerprint, done.source);
                }
                Err(e) => failures.push(Failure {
                    item_id: work.item_id,
                    path: work.path,
                    stage: FailureStage::Fingerprint,
                    reason: e.to_string(),
                }),
            }
        }
        (stats, failures)
    }

    /// Propagate every known fingerprint to tags and records. Returns whether
    /// the phase was interrupted.
    ///
    /// Tag-sourced items are included: a record write that failed in an
    /// earlier run, or a record created since, is mirrored here. Both calls
    /// are no-ops for items already in sync.
    fn sync(&self, items: &mut [MediaItem], report: &mut RunReport) -> bool {
        let targets: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.fingerprint.is_some())
            .map(|(idx, _)| idx)
            .collect();
        if targets.is_empty() {
            return false;
        }
        log::info!("Syncing {} fingerprint(s) to tags and records", targets.len());
        let progress = self.config.progress_callback.as_ref();
        if let Some(cb) = progress {
            cb.on_phase_start("sync", targets.len());
        }

        let mut interrupted = false;
        for (n, idx) in targets.into_iter().enumerate() {
            if self.config.is_shutdown_requested() {
                interrupted = true;
                break;
            }
            let item = &mut items[idx];
            if let Some(cb) = progress {
                cb.on_progress(n + 1, &item.file_path.to_string_lossy());
            }

            let tag = sync_fingerprint(self.catalog, item);
            report.sync.add_tag(&tag);
            if let TagSyncOutcome::Failed(reason) = tag {
                report.failures.push(failure(item, FailureStage::Tag, reason));
            }

            let record = sync_record(self.workspace, &self.schema, item);
            report.sync.add_record(&record);
            if let RecordSyncOutcome::Failed { reason } = record {
                report.failures.push(failure(item, FailureStage::Record, reason));
            }
        }

        if let Some(cb) = progress {
            cb.on_phase_end("sync");
        }
        log::info!(
            "Sync complete: {} tagged, {} record(s) updated, {} no match",
            report.sync.tagged,
            report.sync.records_updated,
            report.sync.no_match
        );
        interrupted
    }

    /// Group, resolve, and (when executing) dispose losers.
    fn deduplicate(&self, items: &[MediaItem], report: &mut RunReport) {
        let (groups, stats) = duplicates::group_items(items, &self.config.grouping);
        report.grouping = Some(stats);

        let resolutions: Vec<_> = groups
            .iter()
            .filter_map(|group| duplicates::resolve(&group.items).map(|r| (group.match_kind, r)))
            .collect();

        let mut disposer = self.config.execute.then(|| Disposer::new(self.catalog));
        let total_losers: usize = resolutions.iter().map(|(_, r)| r.losers.len()).sum();
        let progress = self.config.progress_callback.as_ref();
        if disposer.is_some() && total_losers > 0 {
            if let Some(cb) = progress {
                cb.on_phase_start("dispose", total_losers);
            }
        }

        let mut done = 0;
        for (match_kind, resolution) in &resolutions {
            let mut losers = Vec::with_capacity(resolution.losers.len());
            for loser in &resolution.losers {
                let mut disposal = None;
                if let Some(disposer) = disposer.as_mut() {
                    if report.interrupted || self.config.is_shutdown_requested() {
                        report.interrupted = true;
                    } else {
                        done += 1;
                        if let Some(cb) = progress {
                            cb.on_progress(done, &loser.file_path.to_string_lossy());
                        }
                        let outcome = disposer.dispose(loser);
                        report.disposal.add(&outcome);
                        if let DisposeOutcome::Failed(reason) = &outcome {
                            report
                                .failures
                                .push(failure(loser, FailureStage::Dispose, reason.clone()));
                        }
                        disposal = Some(outcome);
                    }
                }
                losers.push(LoserReport {
                    item: ItemSummary::from(loser),
                    disposal,
                });
            }
            report.groups.push(GroupReport {
                match_kind: *match_kind,
                keeper: ItemSummary::from(&resolution.keeper),
                reason: resolution.reason,
                losers,
            });
        }

        if disposer.is_some() && total_losers > 0 {
            if let Some(cb) = progress {
                cb.on_phase_end("dispose");
            }
        }
        log::info!(
            "Deduplication: {} group(s), {} loser(s){}",
            report.groups.len(),
            total_losers,
            if self.config.execute { "" } else { " (dry run)" }
        );
    }
}

fn id_index(items: &[MediaItem]) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| (item.item_id.clone(), idx))
        .collect()
}

fn failure(item: &MediaItem, stage: FailureStage, reason: String) -> Failure {
    Failure {
        item_id: item.item_id.clone(),
        path: item.file_path.clone(),
        stage,
        reason,
    }
}
