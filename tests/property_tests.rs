use std::collections::BTreeSet;
use std::fs;

use proptest::prelude::*;
use tempfile::TempDir;
use trackdedup::catalog::{CatalogEntry, InMemoryCatalog, InMemoryWorkspace, RecordSchema};
use trackdedup::duplicates::{self, GroupingConfig};
use trackdedup::engine::{DedupEngine, EngineConfig};
use trackdedup::fingerprint::{self, Fingerprint};
use trackdedup::report::GroupReport;

const NAMES: &[&str] = &[
    "Blue Monday",
    "Blue Monday (Remix)",
    "Blue Mondays",
    "Ceremony",
    "Temptation",
    "Temptation '87",
    "Age of Consent",
    "Regret",
];
const EXTS: &[&str] = &["flac", "wav", "aiff", "m4a", "mp3"];

fn catalog_strategy() -> impl Strategy<Value = Vec<CatalogEntry>> {
    prop::collection::vec(
        (0..NAMES.len(), 0..EXTS.len(), prop::option::weighted(0.6, 0u8..6)),
        0..40,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (name, ext, fp))| CatalogEntry {
                id: format!("id-{:03}", i),
                name: NAMES[name].to_string(),
                path: format!("/nonexistent/{}.{}", i, EXTS[ext]).into(),
                tags: fp
                    .map(|b| Fingerprint::from_bytes([b; 32]).to_tag())
                    .into_iter()
                    .collect(),
                trashed: false,
            })
            .collect()
    })
}

fn groups_for(entries: Vec<CatalogEntry>) -> Vec<GroupReport> {
    let catalog = InMemoryCatalog::new(entries);
    let workspace = InMemoryWorkspace::new(Vec::new());
    let config = EngineConfig::default()
        .with_fingerprint_limit(Some(0))
        .with_coverage_gate(0.8, false);
    DedupEngine::new(&catalog, &workspace, RecordSchema::default(), config)
        .run()
        .unwrap()
        .groups
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_runs_are_deterministic(entries in catalog_strategy()) {
        let mut reversed = entries.clone();
        reversed.reverse();

        let first = groups_for(entries.clone());
        let second = groups_for(entries);
        let third = groups_for(reversed);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &third);
    }

    #[test]
    fn test_groups_partition_and_keepers_survive(entries in catalog_strategy()) {
        let groups = groups_for(entries);

        let mut seen = BTreeSet::new();
        let mut keepers = BTreeSet::new();
        for group in &groups {
            prop_assert!(!group.losers.is_empty());
            prop_assert!(seen.insert(group.keeper.item_id.clone()));
            keepers.insert(group.keeper.item_id.clone());
            for loser in &group.losers {
                prop_assert!(seen.insert(loser.item.item_id.clone()));
            }
        }
        for group in &groups {
            for loser in &group.losers {
                prop_assert!(!keepers.contains(&loser.item.item_id));
            }
        }
    }

    #[test]
    fn test_grouping_ignores_input_order(entries in catalog_strategy()) {
        let items: Vec<_> = entries
            .into_iter()
            .filter_map(trackdedup::catalog::MediaItem::from_entry)
            .collect();
        let mut sorted = items.clone();
        sorted.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        let mut shuffled = items;
        shuffled.reverse();
        shuffled.rotate_left(sorted.len() / 2);

        let config = GroupingConfig::default();
        let (a, _) = duplicates::group_items(&sorted, &config);
        let (b, _) = duplicates::group_items(&shuffled, &config);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_determinism(content in prop::collection::vec(any::<u8>(), 1..4096)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track.mp3");
        fs::write(&path, &content).unwrap();

        let first = fingerprint::compute(&path).unwrap();
        let second = fingerprint::compute(&path).unwrap();
        prop_assert_eq!(first, second);
        let expected = blake3::hash(&content);
        prop_assert_eq!(first.as_bytes(), expected.as_bytes());
    }

    #[test]
    fn test_one_byte_changes_fingerprint(
        content in prop::collection::vec(any::<u8>(), 1..4096),
        index in any::<prop::sample::Index>(),
    ) {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("a.flac");
        let altered = dir.path().join("b.flac");
        let mut changed = content.clone();
        let i = index.index(changed.len());
        changed[i] ^= 0x01;
        fs::write(&original, &content).unwrap();
        fs::write(&altered, &changed).unwrap();

        prop_assert_ne!(
            fingerprint::compute(&original).unwrap(),
            fingerprint::compute(&altered).unwrap()
        );
    }
}
