use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use trackdedup::actions::DisposeOutcome;
use trackdedup::catalog::{InMemoryCatalog, InMemoryWorkspace, RecordSchema};
use trackdedup::duplicates::{GateDecision, KeeperReason};
use trackdedup::engine::{DedupEngine, EngineConfig};
use trackdedup::fingerprint::{self, Fingerprint};
use trackdedup::progress::ProgressCallback;
use trackdedup::report::{FailureStage, RunMode, RunReport};
use trackdedup::signal::ShutdownHandler;

use super::fixtures::{aiff_bytes, entry, mpeg_bytes, record, write_file, write_wav};

const OLD: i64 = 1_577_836_800; // 2020-01-01
const NEW: i64 = 1_640_995_200; // 2022-01-01

struct Library {
    catalog: InMemoryCatalog,
    workspace: InMemoryWorkspace,
    shared: Fingerprint,
}

/// Five items: two identical AIFF files and an MP3 already tagged with their
/// fingerprint, plus an unrelated MP3 and a WAV.
fn five_item_library(dir: &Path) -> Library {
    let aiff_old = write_file(dir, "Song.aiff", &aiff_bytes(), OLD);
    let aiff_new = write_file(dir, "Song (copy).aiff", &aiff_bytes(), NEW);
    let mp3 = write_file(dir, "Song.mp3", &mpeg_bytes(0), NEW);
    let other = write_file(dir, "Other.mp3", &mpeg_bytes(7), OLD);
    let wav = write_wav(dir, "Tone.wav", OLD);

    let shared = fingerprint::compute(&aiff_old).unwrap();
    let catalog = InMemoryCatalog::new(vec![
        entry("item-a", "Song", &aiff_old, None),
        entry("item-b", "Song", &aiff_new, None),
        entry("item-c", "Song", &mp3, Some(shared)),
        entry("item-d", "Other", &other, None),
        entry("item-e", "Tone", &wav, None),
    ]);
    let workspace = InMemoryWorkspace::new(vec![
        record("rec-1", "AIFF Path", &aiff_new),
        record("rec-2", "MP3 Path", &other),
    ]);
    Library {
        catalog,
        workspace,
        shared,
    }
}

fn run(lib: &Library, config: EngineConfig) -> RunReport {
    DedupEngine::new(&lib.catalog, &lib.workspace, RecordSchema::default(), config)
        .run()
        .unwrap()
}

#[test]
fn test_five_item_dry_run() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());
    let before: Vec<Vec<u8>> = ["Song.aiff", "Song (copy).aiff", "Other.mp3"]
        .iter()
        .map(|n| std::fs::read(dir.path().join(n)).unwrap())
        .collect();

    let report = run(&lib, EngineConfig::default());

    assert_eq!(report.mode, RunMode::DryRun);
    assert_eq!(report.scanned, 5);
    assert_eq!(report.coverage_before.covered, 1);
    assert_eq!(report.coverage_after.covered, 5);
    assert_eq!(report.coverage_after.ratio(), 1.0);
    assert!(matches!(report.gate, GateDecision::Proceed { .. }));
    assert!(report.failures.is_empty());

    assert_eq!(report.groups.len(), 1);
    let group = &report.groups[0];
    assert!(group.match_kind.is_exact());
    assert_eq!(group.keeper.item_id, "item-b");
    assert_eq!(group.reason, KeeperReason::Recency);
    let losers: Vec<_> = group.losers.iter().map(|l| l.item.item_id.as_str()).collect();
    assert_eq!(losers, ["item-a", "item-c"]);
    assert!(group.losers.iter().all(|l| l.disposal.is_none()));

    // Nothing written anywhere.
    assert_eq!(lib.catalog.tag_update_count(), 0);
    assert_eq!(lib.catalog.trash_call_count(), 0);
    assert_eq!(lib.workspace.update_count(), 0);
    let after: Vec<Vec<u8>> = ["Song.aiff", "Song (copy).aiff", "Other.mp3"]
        .iter()
        .map(|n| std::fs::read(dir.path().join(n)).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_five_item_execute() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());

    let report = run(&lib, EngineConfig::default().with_execute(true));

    assert_eq!(report.mode, RunMode::Execute);
    assert_eq!(report.coverage_after.covered, 5);
    assert_eq!(report.fingerprinting.computed, 4);
    // Two AIFF files and one MP3 written; the WAV cannot carry a digest.
    assert_eq!(report.fingerprinting.embedded_written, 3);
    assert_eq!(report.fingerprinting.embed_unsupported, 1);

    // Tags for the four newly fingerprinted items; item-c already had one.
    assert_eq!(report.sync.tagged, 4);
    assert_eq!(report.sync.already_tagged, 1);
    assert_eq!(lib.catalog.tag_update_count(), 4);
    assert_eq!(report.sync.records_updated, 2);
    assert_eq!(report.sync.no_match, 3);
    let rec = lib.workspace.record("rec-1").unwrap();
    assert_eq!(rec.fields["Fingerprint"], lib.shared.to_hex());

    // The keeper survives, both losers sit in the trash.
    assert_eq!(report.disposal.relocated, 2);
    assert!(!lib.catalog.entry("item-b").unwrap().trashed);
    assert!(lib.catalog.entry("item-a").unwrap().trashed);
    assert!(lib.catalog.entry("item-c").unwrap().trashed);
    assert!(report.groups[0]
        .losers
        .iter()
        .all(|l| l.disposal == Some(DisposeOutcome::Relocated)));

    // Embedded digests are the pre-embed identity.
    let embedded = fingerprint::extract(&dir.path().join("Song.aiff")).unwrap();
    assert_eq!(embedded, lib.shared);
    assert!(report.failures.is_empty());
}

#[test]
fn test_disposal_is_not_deletion() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());

    run(&lib, EngineConfig::default().with_execute(true));

    // Losers stay retrievable in the catalog and on disk.
    let loser = lib.catalog.entry("item-a").unwrap();
    assert!(loser.trashed);
    assert!(loser.path.exists());
    assert!(dir.path().join("Song.mp3").exists());
    assert_eq!(lib.catalog.entries().len(), 5);
}

#[test]
fn test_second_execute_is_a_no_op() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());

    run(&lib, EngineConfig::default().with_execute(true));
    let tags = lib.catalog.tag_update_count();
    let trash = lib.catalog.trash_call_count();
    let updates = lib.workspace.update_count();

    let second = run(&lib, EngineConfig::default().with_execute(true));

    assert_eq!(second.scanned, 3);
    assert_eq!(second.coverage_before.covered, 3);
    assert_eq!(second.fingerprinting.input_items, 0);
    assert!(second.groups.is_empty());
    assert_eq!(lib.catalog.tag_update_count(), tags);
    assert_eq!(lib.catalog.trash_call_count(), trash);
    assert_eq!(lib.workspace.update_count(), updates);
}

#[test]
fn test_records_mirrored_after_workspace_outage() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());
    lib.workspace.set_unreachable(true);

    let first = run(&lib, EngineConfig::default().with_execute(true));
    assert_eq!(first.sync.tagged, 4);
    assert_eq!(first.sync.records_updated, 0);
    assert!(first.sync.record_failed > 0);

    // Every item is tagged now; the records still have to catch up.
    lib.workspace.set_unreachable(false);
    let second = run(&lib, EngineConfig::default().with_execute(true));

    assert_eq!(second.sync.tagged, 0);
    assert_eq!(second.sync.records_updated, 2);
    assert_eq!(second.sync.record_failed, 0);
    assert_eq!(
        lib.workspace.record("rec-1").unwrap().fields["Fingerprint"],
        lib.shared.to_hex()
    );
    assert!(lib.workspace.record("rec-2").unwrap().fields.get("Fingerprint").is_some());

    // Once mirrored, later runs write nothing.
    let updates = lib.workspace.update_count();
    let third = run(&lib, EngineConfig::default().with_execute(true));
    assert_eq!(third.sync.records_updated, 0);
    assert_eq!(third.sync.records_current, 2);
    assert_eq!(lib.workspace.update_count(), updates);
}

#[test]
fn test_limit_caps_fingerprinting() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());

    let report = run(
        &lib,
        EngineConfig::default().with_fingerprint_limit(Some(2)),
    );

    assert_eq!(report.fingerprinting.input_items, 2);
    assert_eq!(report.coverage_after.covered, 3);
    // 60% < 80%: blocked, nothing grouped.
    assert!(!report.gate.is_proceed());
    assert!(report.groups.is_empty());
    assert!(report.grouping.is_none());
}

#[test]
fn test_blocked_gate_still_persists_fingerprints() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());

    let report = run(
        &lib,
        EngineConfig::default()
            .with_execute(true)
            .with_fingerprint_limit(Some(1)),
    );

    assert!(!report.gate.is_proceed());
    assert_eq!(report.sync.tagged, 1);
    assert_eq!(lib.catalog.trash_call_count(), 0);

    // Repeated limited runs converge on full coverage.
    for _ in 0..3 {
        run(
            &lib,
            EngineConfig::default()
                .with_execute(true)
                .with_fingerprint_limit(Some(1)),
        );
    }
    let report = run(&lib, EngineConfig::default());
    assert_eq!(report.coverage_before.covered, 5);
    assert!(report.gate.is_proceed());
}

#[test]
fn test_vanished_file_is_reported_and_skipped() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());
    std::fs::remove_file(dir.path().join("Other.mp3")).unwrap();

    let report = run(&lib, EngineConfig::default());

    assert_eq!(report.coverage_after.covered, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item_id, "item-d");
    assert_eq!(report.failures[0].stage, FailureStage::Fingerprint);
    // 80% is enough: the gate is inclusive.
    assert!(report.gate.is_proceed());
    assert_eq!(report.groups.len(), 1);
}

#[test]
fn test_unreachable_workspace_fails_per_item() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());
    lib.workspace.set_unreachable(true);

    let report = run(&lib, EngineConfig::default().with_execute(true));

    assert_eq!(report.sync.tagged, 4);
    assert_eq!(report.sync.record_failed, 5);
    assert_eq!(
        report
            .failures
            .iter()
            .filter(|f| f.stage == FailureStage::Record)
            .count(),
        5
    );
    // Disposal still ran.
    assert_eq!(report.disposal.relocated, 2);
}

/// Requests shutdown as soon as the named phase starts.
struct InterruptAt {
    phase: &'static str,
    handler: ShutdownHandler,
}

impl ProgressCallback for InterruptAt {
    fn on_phase_start(&self, phase: &str, _total: usize) {
        if phase == self.phase {
            self.handler.request_shutdown();
        }
    }
    fn on_progress(&self, _current: usize, _path: &str) {}
    fn on_phase_end(&self, _phase: &str) {}
}

#[test]
fn test_interrupt_stops_before_grouping_and_writes() {
    let dir = tempdir().unwrap();
    let lib = five_item_library(dir.path());
    let handler = ShutdownHandler::new();
    let callback = Arc::new(InterruptAt {
        phase: "fingerprint",
        handler: handler.clone(),
    });
    let before = std::fs::read(dir.path().join("Song.aiff")).unwrap();

    let report = run(
        &lib,
        EngineConfig::default()
            .with_execute(true)
            .with_shutdown_flag(handler.get_flag())
            .with_progress_callback(callback),
    );

    assert!(handler.is_shutdown_requested());
    assert!(report.interrupted);
    assert!(report.fingerprinting.interrupted);
    assert_eq!(report.fingerprinting.fingerprinted, 0);
    assert!(report.grouping.is_none());
    assert!(report.groups.is_empty());
    assert_eq!(lib.catalog.tag_update_count(), 0);
    assert_eq!(lib.catalog.trash_call_count(), 0);
    assert_eq!(std::fs::read(dir.path().join("Song.aiff")).unwrap(), before);
}
