use std::fs;
use std::path::Path;

use clap::Parser;
use tempfile::tempdir;
use trackdedup::catalog::{
    InMemoryCatalog, InMemoryWorkspace, RecordSchema, Retrying, RetryPolicy, Snapshot,
};
use trackdedup::cli::Cli;
use trackdedup::engine::{DedupEngine, EngineConfig};
use trackdedup::error::ExitCode;
use trackdedup::fingerprint;

use super::fixtures::{aiff_bytes, entry, mpeg_bytes, record, write_file};

fn write_snapshot(dir: &Path) -> std::path::PathBuf {
    let a = write_file(dir, "Song.aiff", &aiff_bytes(), 1_600_000_000);
    let b = write_file(dir, "Song (copy).aiff", &aiff_bytes(), 1_650_000_000);
    let c = write_file(dir, "Other.mp3", &mpeg_bytes(3), 1_600_000_000);
    let snapshot = Snapshot {
        items: vec![
            entry("item-a", "Song", &a, None),
            entry("item-b", "Song", &b, None),
            entry("item-c", "Other", &c, None),
        ],
        records: vec![record("rec-1", "AIFF Path", &b)],
    };
    let path = dir.join("snapshot.json");
    fs::write(&path, serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();
    path
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    fs::write(&path, "io_threads = 2\ncoverage_threshold = 0.5\n").unwrap();
    path
}

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("trackdedup").chain(args.iter().copied())).unwrap()
}

#[test]
fn test_run_from_snapshot() {
    let dir = tempdir().unwrap();
    let snapshot = write_snapshot(dir.path());
    let config = write_config(dir.path());

    let code = trackdedup::run_app(cli(&[
        "-q",
        "-o",
        "json",
        "--config",
        config.to_str().unwrap(),
        "run",
        "--snapshot",
        snapshot.to_str().unwrap(),
    ]))
    .unwrap();

    assert_eq!(code, ExitCode::Success);
}

#[test]
fn test_snapshot_run_never_writes_files() {
    let dir = tempdir().unwrap();
    let snapshot = write_snapshot(dir.path());
    let config = write_config(dir.path());
    let before = fs::read(dir.path().join("Song.aiff")).unwrap();

    let code = trackdedup::run_app(cli(&[
        "-q",
        "-o",
        "json",
        "--config",
        config.to_str().unwrap(),
        "run",
        "--execute",
        "--snapshot",
        snapshot.to_str().unwrap(),
    ]))
    .unwrap();

    assert_eq!(code, ExitCode::Success);
    assert_eq!(fs::read(dir.path().join("Song.aiff")).unwrap(), before);
}

#[test]
fn test_coverage_from_snapshot() {
    let dir = tempdir().unwrap();
    let snapshot = write_snapshot(dir.path());
    let config = write_config(dir.path());

    let code = trackdedup::run_app(cli(&[
        "-q",
        "-o",
        "json",
        "--config",
        config.to_str().unwrap(),
        "coverage",
        "--snapshot",
        snapshot.to_str().unwrap(),
    ]))
    .unwrap();

    assert_eq!(code, ExitCode::Success);
}

#[test]
fn test_fingerprint_subcommand_embeds_on_execute() {
    let dir = tempdir().unwrap();
    let path = write_file(dir.path(), "Song.aiff", &aiff_bytes(), 1_600_000_000);
    let expected = fingerprint::compute(&path).unwrap();

    let code = trackdedup::run_app(cli(&[
        "-q",
        "-o",
        "json",
        "fingerprint",
        "--execute",
        path.to_str().unwrap(),
        dir.path().join("notes.txt").to_str().unwrap(),
    ]))
    .unwrap();

    assert_eq!(code, ExitCode::Success);
    assert_eq!(fingerprint::extract(&path).unwrap(), expected);
}

#[test]
fn test_missing_snapshot_is_a_setup_failure() {
    let dir = tempdir().unwrap();

    let err = trackdedup::run_app(cli(&[
        "-q",
        "run",
        "--snapshot",
        dir.path().join("missing.json").to_str().unwrap(),
    ]))
    .unwrap_err();

    assert!(format!("{:#}", err).contains("Failed to load catalog snapshot"));
}

#[test]
fn test_missing_config_is_a_setup_failure() {
    let dir = tempdir().unwrap();

    let err = trackdedup::run_app(cli(&[
        "-q",
        "--config",
        dir.path().join("absent.toml").to_str().unwrap(),
        "config",
    ]))
    .unwrap_err();

    assert!(format!("{:#}", err).contains("Failed to load configuration"));
}

#[test]
fn test_out_of_range_threshold_rejected_by_parser() {
    assert!(Cli::try_parse_from(["trackdedup", "run", "--threshold", "1.5"]).is_err());
    assert!(Cli::try_parse_from(["trackdedup", "run", "--dry-run", "--execute"]).is_err());
}

#[test]
fn test_transient_catalog_failures_are_retried() {
    let dir = tempdir().unwrap();
    let a = write_file(dir.path(), "Song.aiff", &aiff_bytes(), 1_600_000_000);
    let b = write_file(dir.path(), "Song (copy).aiff", &aiff_bytes(), 1_650_000_000);
    let catalog = InMemoryCatalog::new(vec![
        entry("item-a", "Song", &a, None),
        entry("item-b", "Song", &b, None),
    ]);
    let workspace = InMemoryWorkspace::new(Vec::new());
    catalog.fail_next_calls(2);
    workspace.fail_next_calls(1);

    let policy = RetryPolicy::from_millis(3, 1, 2);
    let catalog = Retrying::new(catalog, policy);
    let workspace = Retrying::new(workspace, policy);
    let report = DedupEngine::new(
        &catalog,
        &workspace,
        RecordSchema::default(),
        EngineConfig::default().with_execute(true),
    )
    .run()
    .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.disposal.relocated, 1);
    assert!(catalog.inner().entry("item-a").unwrap().trashed);
}
