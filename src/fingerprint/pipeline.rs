//! Parallel fingerprint pipeline.
//!
//! # Overview
//!
//! Two phases run over catalog items, each on a bounded rayon pool so disk
//! I/O is not oversubscribed:
//!
//! 1. **Probe** - extract already-embedded digests (read-only)
//! 2. **Fingerprint** - for each uncovered item: extract, else compute and
//!    (when enabled) embed
//!
//! Workers share no mutable state. Results come back in input order to a
//! single aggregation point. The shutdown flag is checked before each file,
//! never during a metadata write.
//!
//! # Example
//!
//! ```no_run
//! use trackdedup::fingerprint::{FingerprintPipeline, PipelineConfig};
//! use trackdedup::catalog::MediaItem;
//!
//! let items: Vec<MediaItem> = Vec::new();
//! let refs: Vec<&MediaItem> = items.iter().collect();
//! let pipeline = FingerprintPipeline::new(PipelineConfig::default().with_io_threads(4));
//! let (results, stats) = pipeline.fingerprint(&refs);
//! println!("{} fingerprinted, {} failed", stats.fingerprinted, stats.failed);
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::codec::{self, EmbedOutcome};
use super::{Fingerprint, FingerprintError, Hasher};
use crate::catalog::{FingerprintSource, MediaItem};
use crate::progress::ProgressCallback;

/// Configuration for the fingerprint pipeline.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Number of I/O worker threads.
    /// Default is 4 to prevent disk thrashing.
    pub io_threads: usize,
    /// Write computed digests into files (mutating; requires `--execute`).
    pub embed: bool,
    /// Optional shutdown flag for cooperative cancellation.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("io_threads", &self.io_threads)
            .field("embed", &self.embed)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            io_threads: 4,
            embed: false,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl PipelineConfig {
    /// Set the worker count (minimum 1).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Enable or disable in-file embedding.
    #[must_use]
    pub fn with_embed(mut self, embed: bool) -> Self {
        self.embed = embed;
        self
    }

    /// Set the shutdown flag for graceful termination.
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
}

/// Result of probing one item for an embedded digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Catalog item id
    pub item_id: String,
    /// Embedded digest, if any
    pub fingerprint: Option<Fingerprint>,
}

/// What happened to the in-file slot for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedStatus {
    /// Embedding was disabled for this run.
    Skipped,
    /// The digest was already in the file (found by extraction).
    Present,
    /// Result of the embed call.
    Outcome(EmbedOutcome),
    /// The embed call failed; the computed digest is still valid.
    Failed(String),
}

/// A fingerprint established for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprinted {
    /// The digest
    pub fingerprint: Fingerprint,
    /// How it was obtained
    pub source: FingerprintSource,
    /// In-file slot status
    pub embed: EmbedStatus,
    /// Bytes read to compute it (0 when extracted)
    pub bytes_hashed: u64,
}

/// Outcome of the compute/embed cycle for one item.
#[derive(Debug)]
pub struct WorkResult {
    /// Catalog item id
    pub item_id: String,
    /// File path at snapshot time
    pub path: PathBuf,
    /// The fingerprint, or why it could not be established
    pub result: Result<Fingerprinted, FingerprintError>,
}

/// Statistics from the fingerprint phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PipelineStats {
    /// Items handed to the phase
    pub input_items: usize,
    /// Items whose fingerprint is now known
    pub fingerprinted: usize,
    /// Of those, found already embedded
    pub from_embedded: usize,
    /// Of those, computed from bytes
    pub computed: usize,
    /// Digests written into files
    pub embedded_written: usize,
    /// Items whose format cannot carry a digest
    pub embed_unsupported: usize,
    /// Embed attempts that failed
    pub embed_failed: usize,
    /// Items whose fingerprint could not be established
    pub failed: usize,
    /// Total bytes hashed
    pub bytes_hashed: u64,
    /// Whether the phase stopped early on shutdown
    pub interrupted: bool,
}

impl PipelineStats {
    fn record(&mut self, result: &WorkResult) {
        match &result.result {
            Ok(done) => {
                self.fingerprinted += 1;
                self.bytes_hashed += done.bytes_hashed;
                match done.source {
                    FingerprintSource::Computed => self.computed += 1,
                    _ => self.from_embedded += 1,
                }
                match &done.embed {
                    EmbedStatus::Outcome(EmbedOutcome::Written) => self.embedded_written += 1,
                    EmbedStatus::Outcome(EmbedOutcome::Unsupported) => self.embed_unsupported += 1,
                    EmbedStatus::Failed(_) => self.embed_failed += 1,
                    _ => {}
                }
            }
            Err(_) => self.failed += 1,
        }
    }
}

/// Runs probe and fingerprint phases on a bounded worker pool.
pub struct FingerprintPipeline {
    config: PipelineConfig,
    hasher: Hasher,
}

impl FingerprintPipeline {
    /// Create a pipeline with the given configuration.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            hasher: Hasher::new(),
        }
    }

    /// Extract embedded digests for `items` in parallel.
    ///
    /// Returns one result per processed item, in input order, and whether the
    /// phase was interrupted (items after the interruption are omitted).
    #[must_use]
    pub fn probe(&self, items: &[&MediaItem]) -> (Vec<ProbeResult>, bool) {
        if items.is_empty() {
            return (Vec::new(), false);
        }
        self.phase_start("probe", items.len());
        log::info!("Probing {} file(s) for embedded fingerprints", items.len());

        let work = || {
            items
                .par_iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    if self.config.is_shutdown_requested() {
                        return None;
                    }
                    self.progress(idx, item);
                    let fingerprint = codec::extract_as(&item.file_path, item.container_format);
                    self.item_done(0);
                    Some(ProbeResult {
                        item_id: item.item_id.clone(),
                        fingerprint,
                    })
                })
                .collect::<Vec<_>>()
        };
        let results = self.run_on_pool(work);
        let interrupted = self.config.is_shutdown_requested();
        self.phase_end("probe");

        let found = results.iter().filter(|r| r.fingerprint.is_some()).count();
        log::info!("Probe complete: {} of {} carry an embedded fingerprint", found, results.len());
        (results, interrupted)
    }

    /// Establish fingerprints for `items` in parallel.
    ///
    /// Each item is extracted first (an embedded digest is authoritative);
    /// otherwise its bytes are hashed and, when embedding is enabled, the
    /// digest is written into the file.
    #[must_use]
    pub fn fingerprint(&self, items: &[&MediaItem]) -> (Vec<WorkResult>, PipelineStats) {
        let mut stats = PipelineStats {
            input_items: items.len(),
            ..Default::default()
        };
        if items.is_empty() {
            log::debug!("Fingerprint phase: nothing to do");
            return (Vec::new(), stats);
        }
        self.phase_start("fingerprint", items.len());
        log::info!(
            "Fingerprinting {} file(s) with {} worker(s){}",
            items.len(),
            self.config.io_threads,
            if self.config.embed { "" } else { " (no in-file writes)" }
        );

        let work = || {
            items
                .par_iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    if self.config.is_shutdown_requested() {
                        log::debug!("Fingerprint phase: shutdown requested, skipping remaining files");
                        return None;
                    }
                    self.progress(idx, item);
                    let result = self.process_one(item);
                    if let Err(e) = &result {
                        log::warn!("Failed to fingerprint {}: {}", item.file_path.display(), e);
                    }
                    self.item_done(result.as_ref().map_or(0, |d| d.bytes_hashed));
                    Some(WorkResult {
                        item_id: item.item_id.clone(),
                        path: item.file_path.clone(),
                        result,
                    })
                })
                .collect::<Vec<_>>()
        };
        let results = self.run_on_pool(work);

        for result in &results {
            stats.record(result);
        }
        if self.config.is_shutdown_requested() {
            stats.interrupted = true;
            log::info!("Fingerprint phase: interrupted by shutdown signal");
        }
        self.phase_end("fingerprint");

        log::info!(
            "Fingerprint phase complete: {} established ({} computed, {} embedded), {} failed",
            stats.fingerprinted,
            stats.computed,
            stats.from_embedded,
            stats.failed
        );
        (results, stats)
    }

    /// The full cycle for one file: extract, else compute then embed.
    fn process_one(&self, item: &MediaItem) -> Result<Fingerprinted, FingerprintError> {
        let path = &item.file_path;

        if let Some(fingerprint) = codec::extract_as(path, item.container_format) {
            log::trace!("Embedded fingerprint found: {}", path.display());
            return Ok(Fingerprinted {
                fingerprint,
                source: FingerprintSource::Embedded,
                embed: EmbedStatus::Present,
                bytes_hashed: 0,
            });
        }

        let size = std::fs::metadata(path)
            .map_err(|e| FingerprintError::from_io(path, e))?
            .len();
        let fingerprint = self.hasher.compute(path)?;

        let embed = if !self.config.embed {
            EmbedStatus::Skipped
        } else {
            match codec::embed_computed(path, &fingerprint) {
                Ok(outcome) => EmbedStatus::Outcome(outcome),
                Err(e) => {
                    log::warn!("Could not embed fingerprint into {}: {}", path.display(), e);
                    EmbedStatus::Failed(e.to_string())
                }
            }
        };

        Ok(Fingerprinted {
            fingerprint,
            source: FingerprintSource::Computed,
            embed,
            bytes_hashed: size,
        })
    }

    fn run_on_pool<T, F>(&self, work: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()
        {
            Ok(pool) => pool.install(work),
            Err(e) => {
                log::warn!(
                    "Failed to create worker pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
                work()
            }
        }
    }

    fn phase_start(&self, phase: &str, total: usize) {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(phase, total);
        }
    }

    fn progress(&self, idx: usize, item: &MediaItem) {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_progress(idx + 1, item.file_path.to_string_lossy().as_ref());
        }
    }

    fn item_done(&self, bytes: u64) {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_item_completed(bytes);
        }
    }

    fn phase_end(&self, phase: &str) {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(phase);
        }
    }
}
