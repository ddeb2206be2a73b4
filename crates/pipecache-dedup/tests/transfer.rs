//! Upload/download integration tests against in-memory and fault-injecting stores.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fast_config, seeded_bytes, write_tree, CollectingStore, FlakyStore};
use pipecache_dedup::{
    ContentStore, DedupError, HashType, MemoryContentStore, PublishItem, SessionConfig,
    SessionFactory, StoreError,
};
use pipecache_exec::CancellationToken;

async fn factory(store: Arc<dyn ContentStore>, max_attempts: u32) -> SessionFactory {
    SessionFactory::connect(store, fast_config(max_attempts), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn identical_files_transfer_once() {
    let src = tempfile::tempdir().unwrap();
    let payload = seeded_bytes(21, 250_000);
    write_tree(
        src.path(),
        &[("one/copy.bin", payload.clone()), ("two/copy.bin", payload.clone())],
    );

    let store = Arc::new(MemoryContentStore::new());
    let factory = factory(store.clone(), 3).await;
    let upload = factory.create_upload_session();
    let result = upload
        .publish(
            vec![
                PublishItem {
                    logical_path: "/one/copy.bin".into(),
                    path: src.path().join("one/copy.bin"),
                },
                PublishItem {
                    logical_path: "/two/copy.bin".into(),
                    path: src.path().join("two/copy.bin"),
                },
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let items = result.manifest.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].blob, items[1].blob);
    assert_eq!(result.statistics.bytes_saved_by_dedup, 250_000);
    assert!(result.statistics.bytes_uploaded >= 250_000);
    assert!(result.statistics.bytes_uploaded < 2 * 250_000);
}

#[tokio::test]
async fn republishing_sends_no_chunks() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), &[("a.bin", seeded_bytes(22, 180_000))]);
    let store = Arc::new(MemoryContentStore::new());
    let factory = factory(store.clone(), 3).await;
    let cancel = CancellationToken::new();
    let item = || {
        vec![PublishItem {
            logical_path: "/a.bin".into(),
            path: src.path().join("a.bin"),
        }]
    };

    factory.create_upload_session().publish(item(), &cancel).await.unwrap();
    let puts = store.put_count();
    let again = factory.create_upload_session().publish(item(), &cancel).await.unwrap();
    assert_eq!(again.statistics.chunks_uploaded, 0);
    assert_eq!(store.put_count(), puts);
}

#[tokio::test]
async fn retry_succeeds_after_two_failed_attempts() {
    let store = FlakyStore::shared(2);
    let factory = factory(store.clone(), 3).await;
    let upload = factory.create_upload_session();
    let (root, sources) = upload.hash_bytes(b"single chunk").unwrap();

    let stats = upload
        .upload(&root, sources, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.chunks_uploaded, 1);
    assert_eq!(stats.nodes_uploaded, 1);
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 4);
    assert!(store.inner.contains(&root.id()));
}

#[tokio::test]
async fn retry_gives_up_after_three_attempts() {
    let store = FlakyStore::shared(3);
    let factory = factory(store.clone(), 3).await;
    let upload = factory.create_upload_session();
    let (root, sources) = upload.hash_bytes(b"single chunk").unwrap();

    let err = upload
        .upload(&root, sources, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DedupError::Store(StoreError::Unavailable(_))));
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 3);
    assert!(!store.inner.contains(&root.id()));
}

#[tokio::test]
async fn failed_file_does_not_block_the_batch() {
    let src = tempfile::tempdir().unwrap();
    write_tree(
        src.path(),
        &[("good1.txt", b"one".to_vec()), ("good2.txt", b"two".to_vec())],
    );
    let store = Arc::new(MemoryContentStore::new());
    let factory = factory(store, 3).await;
    let result = factory
        .create_upload_session()
        .publish(
            vec![
                PublishItem {
                    logical_path: "good1.txt".into(),
                    path: src.path().join("good1.txt"),
                },
                PublishItem {
                    logical_path: "missing.txt".into(),
                    path: src.path().join("missing.txt"),
                },
                PublishItem {
                    logical_path: "good2.txt".into(),
                    path: src.path().join("good2.txt"),
                },
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let paths: Vec<_> = result.manifest.items().iter().map(|i| i.path.clone()).collect();
    assert_eq!(paths, vec!["/good1.txt", "/good2.txt"]);
    assert_eq!(result.failed.len(), 1);
    assert!(result.failed[0].path.ends_with("missing.txt"));
    assert!(matches!(result.failed[0].error, DedupError::Io(_)));
}

#[tokio::test]
async fn directory_roundtrip() {
    let src = tempfile::tempdir().unwrap();
    let files = vec![
        ("empty.txt", Vec::new()),
        ("small.txt", b"hello".to_vec()),
        ("nested/deep/large.bin", seeded_bytes(23, 1_500_000)),
    ];
    write_tree(src.path(), &files);

    let store = Arc::new(MemoryContentStore::with_hash_type(HashType::Blake3Cdc));
    let cancel = CancellationToken::new();
    let config = SessionConfig {
        hash_type: None,
        ..fast_config(3)
    };
    let factory = SessionFactory::connect(store, config, &cancel).await.unwrap();
    assert_eq!(factory.hash_type(), HashType::Blake3Cdc);
    let items = files
        .iter()
        .map(|(rel, _)| PublishItem {
            logical_path: rel.to_string(),
            path: src.path().join(rel),
        })
        .collect();
    let published = factory
        .create_upload_session()
        .publish(items, &cancel)
        .await
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    let downloaded = factory
        .create_download_session()
        .download_manifest(published.manifest_id, out.path(), Arc::new(|_: &str| true), &cancel)
        .await
        .unwrap();
    assert_eq!(downloaded.files.len(), 3);
    for (rel, data) in &files {
        assert_eq!(&std::fs::read(out.path().join(rel)).unwrap(), data, "{rel}");
    }
    assert_eq!(downloaded.statistics.bytes_downloaded, 1_500_005);
}

#[tokio::test]
async fn cancellation_is_reported_distinctly() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), &[("a.bin", seeded_bytes(24, 100_000))]);
    let store = Arc::new(MemoryContentStore::new());
    let factory = factory(store.clone(), 3).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = factory
        .create_upload_session()
        .publish(
            vec![PublishItem {
                logical_path: "a.bin".into(),
                path: src.path().join("a.bin"),
            }],
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(store.is_empty());
}

#[tokio::test]
async fn new_blobs_survive_collection_right_after_put() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), &[("a.bin", seeded_bytes(31, 150_000))]);
    let store = CollectingStore::shared();
    let factory = factory(store.clone(), 1).await;
    let cancel = CancellationToken::new();

    let result = factory
        .create_upload_session()
        .publish(
            vec![PublishItem {
                logical_path: "/a.bin".into(),
                path: src.path().join("a.bin"),
            }],
            &cancel,
        )
        .await
        .unwrap();
    assert!(!store.calls.lock().unwrap().contains(&"keep_until"));
    assert!(store.inner.keep_until_of(&result.manifest_id).is_some());

    let dst = tempfile::tempdir().unwrap();
    factory
        .create_download_session()
        .download_manifest(result.manifest_id, dst.path(), Arc::new(|_: &str| true), &cancel)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(dst.path().join("a.bin")).unwrap(),
        seeded_bytes(31, 150_000)
    );
}

#[tokio::test]
async fn blob_collected_after_existence_check_is_uploaded_again() {
    let store = CollectingStore::shared();
    let factory = factory(store.clone(), 1).await;
    let upload = factory.create_upload_session();
    let (root, sources) = upload.hash_bytes(b"unreferenced leftover").unwrap();
    let leaf = root.leaves()[0].id();
    store.inner.replace_raw(leaf, bytes::Bytes::from_static(b"\0unreferenced leftover"));

    let stats = upload
        .upload(&root, sources, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.chunks_uploaded, 1);
    assert!(store.inner.keep_until_of(&leaf).is_some());
    assert_eq!(store.inner.put_count(), 2);
}
