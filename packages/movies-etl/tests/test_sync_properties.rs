//! Property tests: any catalog ends up fully indexed after one pass,
//! whatever its size relative to the batch size.

mod common;

use std::collections::BTreeSet;

use common::*;
use movies_etl::{Checkpoint, CheckpointManager, SyncMode};
use movies_state::InMemoryStateStore;
use proptest::prelude::*;
use std::sync::Arc;

fn catalog() -> impl Strategy<Value = Vec<(u128, i64)>> {
    // few distinct minutes so timestamps tie across page boundaries
    prop::collection::btree_map(1u128..10_000, 0i64..30, 0..120)
        .prop_map(|films| films.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn full_sync_indexes_every_film(films in catalog(), batch_size in 1usize..12) {
        let rows = films.iter().map(|&(n, minute)| film(n, minute, "Film")).collect();
        let source = FakeSource::new(rows);
        let sink = RecordingSink::new();
        let store = InMemoryStateStore::new();
        let mut sync = sync_loop(&source, &sink, &store, batch_size);

        let report = tokio_test::block_on(sync.run_cycle()).unwrap();

        let expected: BTreeSet<_> = films.iter().map(|&(n, _)| film_id(n)).collect();
        let indexed: BTreeSet<_> = sink.documents().keys().copied().collect();
        prop_assert_eq!(indexed, expected);
        prop_assert_eq!(report.mode, Some(SyncMode::Full));
        prop_assert_eq!(report.documents, films.len());
        prop_assert_eq!(report.pages, (films.len() + batch_size - 1) / batch_size);

        // last row in (modified, id) order
        let newest = films.iter().map(|&(n, minute)| (minute, n)).max();
        let stored = tokio_test::block_on(CheckpointManager::new(Arc::new(store.clone())).load()).unwrap();
        prop_assert_eq!(stored, newest.map(|(minute, n)| checkpoint_at(n, minute)));
        prop_assert_eq!(store.save_count(), usize::from(newest.is_some()));
    }

    #[test]
    fn incremental_sync_indexes_only_newer_films(
        films in catalog(),
        watermark in 0i64..30,
        batch_size in 1usize..12,
    ) {
        let rows = films.iter().map(|&(n, minute)| film(n, minute, "Film")).collect();
        let source = FakeSource::new(rows);
        let sink = RecordingSink::new();
        let store = InMemoryStateStore::with_state(checkpoint_state(&ts(watermark).to_rfc3339()));
        let mut sync = sync_loop(&source, &sink, &store, batch_size);

        let report = tokio_test::block_on(sync.run_cycle()).unwrap();

        let newer: Vec<_> = films.iter().filter(|&&(_, minute)| minute > watermark).collect();
        let expected: BTreeSet<_> = newer.iter().map(|&&(n, _)| film_id(n)).collect();
        let indexed: BTreeSet<_> = sink.documents().keys().copied().collect();
        prop_assert_eq!(indexed, expected);
        prop_assert_eq!(report.mode, Some(SyncMode::Incremental));

        let expected = newer
            .iter()
            .map(|&&(n, minute)| (minute, n))
            .max()
            .map_or(Checkpoint::new(ts(watermark)), |(minute, n)| checkpoint_at(n, minute));
        let stored = tokio_test::block_on(CheckpointManager::new(Arc::new(store.clone())).load()).unwrap();
        prop_assert_eq!(stored, Some(expected));
    }
}
