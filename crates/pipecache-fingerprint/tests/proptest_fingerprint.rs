//! Property-based tests for pipecache-fingerprint using proptest.

mod common;

use std::collections::BTreeMap;

use common::{evaluate, write_tree};
use pipecache_fingerprint::{split_key, FingerprintKind};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn files() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        "[a-z]{1,6}/[a-z]{1,6}\\.dat",
        prop::collection::vec(any::<u8>(), 0..64),
        1..12,
    )
    .prop_map(|m: BTreeMap<String, Vec<u8>>| m.into_iter().collect::<Vec<_>>())
    .prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Creation order never changes either kind of fingerprint.
    #[test]
    fn prop_creation_order_is_irrelevant(files in files()) {
        let rt = runtime();
        let forward = tempfile::tempdir().unwrap();
        let backward = tempfile::tempdir().unwrap();
        let borrowed: Vec<(&str, &[u8])> =
            files.iter().map(|(p, d)| (p.as_str(), d.as_slice())).collect();
        let reversed: Vec<(&str, &[u8])> = borrowed.iter().rev().cloned().collect();
        write_tree(forward.path(), &borrowed);
        write_tree(backward.path(), &reversed);

        for kind in [FingerprintKind::Key, FingerprintKind::Path] {
            let a = rt.block_on(evaluate(forward.path(), &["**/*.dat"], kind)).unwrap();
            let b = rt.block_on(evaluate(backward.path(), &["**/*.dat"], kind)).unwrap();
            prop_assert_eq!(a, b);
        }

        let path_fp = rt.block_on(evaluate(forward.path(), &["**/*.dat"], FingerprintKind::Path)).unwrap();
        let mut expected: Vec<String> = files.iter().map(|(p, _)| p.clone()).collect();
        expected.sort();
        prop_assert_eq!(path_fp.into_segments(), expected);
    }

    /// Splitting never yields blank or untrimmed segments.
    #[test]
    fn prop_split_key_segments_are_trimmed(key in "[a-z .|\n]{0,40}") {
        for segment in split_key(&key) {
            prop_assert!(!segment.is_empty());
            prop_assert_eq!(segment.trim(), segment.as_str());
            prop_assert!(!segment.contains('|') && !segment.contains('\n'));
        }
    }
}
