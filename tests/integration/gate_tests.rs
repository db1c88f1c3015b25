use trackdedup::catalog::{CatalogEntry, InMemoryCatalog, InMemoryWorkspace, RecordSchema};
use trackdedup::duplicates::{self, GateDecision, MatchKind};
use trackdedup::engine::{DedupEngine, EngineConfig};
use trackdedup::report::RunReport;

use super::fixtures::{fp, remote_entry};

fn run(entries: Vec<CatalogEntry>, config: EngineConfig) -> (RunReport, InMemoryCatalog) {
    let catalog = InMemoryCatalog::new(entries);
    let workspace = InMemoryWorkspace::new(Vec::new());
    let report = DedupEngine::new(&catalog, &workspace, RecordSchema::default(), config)
        .run()
        .unwrap();
    (report, catalog)
}

/// 1,000 items, 50 fingerprinted. The fingerprinted ones pair up, and every
/// uncovered item shares a name with nine others, so both strategies would
/// find plenty if allowed to run.
fn thousand_items() -> Vec<CatalogEntry> {
    (0..1000)
        .map(|i| {
            let id = format!("item-{:04}", i);
            if i < 50 {
                remote_entry(&id, "Tagged", "flac", Some(fp((i / 2) as u8)))
            } else {
                remote_entry(&id, &format!("Track {}", i % 95), "mp3", None)
            }
        })
        .collect()
}

#[test]
fn test_five_percent_coverage_blocks_grouping() {
    let (report, catalog) = run(
        thousand_items(),
        EngineConfig::default()
            .with_execute(true)
            .with_fingerprint_limit(Some(0)),
    );

    assert_eq!(report.scanned, 1000);
    assert_eq!(report.coverage_after.covered, 50);
    assert_eq!(
        report.gate,
        GateDecision::Blocked {
            ratio: 0.05,
            threshold: 0.8
        }
    );
    assert!(report.grouping.is_none());
    assert!(report.groups.is_empty());
    assert_eq!(catalog.trash_call_count(), 0);
    assert!(report.render_text().contains("5.0% covered, need 80%"));
}

#[test]
fn test_same_catalog_groups_when_gate_not_required() {
    let (report, _) = run(
        thousand_items(),
        EngineConfig::default()
            .with_fingerprint_limit(Some(0))
            .with_coverage_gate(0.8, false),
    );

    let grouping = report.grouping.unwrap();
    assert_eq!(grouping.exact_groups, 25);
    assert!(grouping.approximate_groups > 0);
}

#[test]
fn test_gate_boundary_is_inclusive() {
    assert!(duplicates::gate(0.80, 0.80, true).is_proceed());
    assert!(!duplicates::gate(0.7999, 0.80, true).is_proceed());
    assert!(duplicates::gate(0.0, 0.80, false).is_proceed());
}

fn remix_catalog(tagged: usize) -> Vec<CatalogEntry> {
    let mut entries = vec![
        remote_entry("remix-1", "Track (Remix)", "mp3", None),
        remote_entry("remix-2", "Track Remix", "aiff", None),
    ];
    for i in 0..tagged {
        let name = format!("Unrelated Title Number {}", i);
        entries.push(remote_entry(&format!("tagged-{}", i), &name, "flac", Some(fp(i as u8 + 1))));
    }
    entries
}

#[test]
fn test_remix_names_blocked_without_coverage() {
    let (report, _) = run(
        remix_catalog(0),
        EngineConfig::default().with_fingerprint_limit(Some(0)),
    );
    assert!(!report.gate.is_proceed());
    assert!(report.groups.is_empty());
}

#[test]
fn test_remix_names_grouped_when_coverage_met() {
    // 8 of 10 covered: exactly the threshold.
    let (report, _) = run(
        remix_catalog(8),
        EngineConfig::default().with_fingerprint_limit(Some(0)),
    );
    assert!(report.gate.is_proceed());
    assert_eq!(report.groups.len(), 1);

    let group = &report.groups[0];
    match group.match_kind {
        MatchKind::Approximate { score } => assert!(score >= 0.75),
        MatchKind::Exact { .. } => panic!("expected a name match"),
    }
    // AIFF outranks MP3.
    assert_eq!(group.keeper.item_id, "remix-2");
    assert_eq!(group.losers[0].item.item_id, "remix-1");
}

#[test]
fn test_remix_names_grouped_when_gate_not_required() {
    let (report, _) = run(
        remix_catalog(0),
        EngineConfig::default()
            .with_fingerprint_limit(Some(0))
            .with_coverage_gate(0.8, false),
    );
    assert_eq!(report.groups.len(), 1);
    assert!(!report.groups[0].match_kind.is_exact());
}

#[test]
fn test_exact_only_never_matches_names() {
    let config = trackdedup::duplicates::GroupingConfig::default().with_fuzzy_fallback(false);
    let (report, _) = run(
        remix_catalog(8),
        EngineConfig::default()
            .with_fingerprint_limit(Some(0))
            .with_grouping(config),
    );
    assert!(report.gate.is_proceed());
    assert!(report.groups.is_empty());
    assert_eq!(report.grouping.unwrap().approximate_groups, 0);
}
