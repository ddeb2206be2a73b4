//! Artifact publish/download through both providers.

mod common;

use std::sync::Arc;

use common::{segments, write_tree, Backend};
use pipecache_server::{
    ArtifactKind, ArtifactLocation, ArtifactProviders, FileShareProvider,
    PipelineArtifactProvider, ServerError,
};
use tokio_util::sync::CancellationToken;

fn drop_tree(root: &std::path::Path) {
    write_tree(
        root,
        &[
            ("bin/tool", b"\x7fELF tool"),
            ("docs/readme.txt", b"read me"),
            ("docs/tmp/scratch.txt", b"scratch"),
            ("logs/build.log", b"ok"),
        ],
    );
}

async fn providers(backend: &Backend, share: &std::path::Path) -> ArtifactProviders {
    let scratch = tempfile::tempdir().unwrap();
    let server = backend.server(scratch.path()).await;
    let mut providers = ArtifactProviders::new();
    providers.register(Arc::new(PipelineArtifactProvider::new(server.session_factory())));
    providers.register(Arc::new(FileShareProvider::new(share)));
    providers
}

#[tokio::test]
async fn both_providers_apply_download_filters() {
    let backend = Backend::new();
    let share = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    drop_tree(source.path());
    let providers = providers(&backend, share.path()).await;
    let cancel = CancellationToken::new();

    for kind in [ArtifactKind::Pipeline, ArtifactKind::FileShare] {
        let provider = providers.get(kind).unwrap();
        let record = provider.publish("drop", source.path(), &cancel).await.unwrap();
        assert_eq!(record.kind, kind);
        assert_eq!(record.files, 4);

        let target = tempfile::tempdir().unwrap();
        let files = provider
            .download(
                &record,
                target.path(),
                &segments(&["**/*.txt", "!**/tmp/**"]),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(files.len(), 1, "{kind}");
        assert_eq!(
            std::fs::read(target.path().join("docs/readme.txt")).unwrap(),
            b"read me"
        );
        assert!(!target.path().join("docs/tmp/scratch.txt").exists());
        assert!(!target.path().join("bin/tool").exists());
    }
}

#[tokio::test]
async fn pipeline_artifact_is_a_manifest_in_the_store() {
    let backend = Backend::new();
    let share = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    drop_tree(source.path());
    let providers = providers(&backend, share.path()).await;
    let cancel = CancellationToken::new();

    let provider = providers.get(ArtifactKind::Pipeline).unwrap();
    let record = provider.publish("drop", source.path(), &cancel).await.unwrap();
    match record.location {
        ArtifactLocation::Manifest(id) => assert!(backend.store.contains(&id)),
        ref other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(record.bytes, 9 + 7 + 7 + 2);

    let target = tempfile::tempdir().unwrap();
    let all = provider.download(&record, target.path(), &[], &cancel).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn records_are_tied_to_their_provider() {
    let backend = Backend::new();
    let share = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    drop_tree(source.path());
    let providers = providers(&backend, share.path()).await;
    let cancel = CancellationToken::new();

    let record = providers
        .get(ArtifactKind::FileShare)
        .unwrap()
        .publish("drop", source.path(), &cancel)
        .await
        .unwrap();
    let target = tempfile::tempdir().unwrap();
    let err = providers
        .get(ArtifactKind::Pipeline)
        .unwrap()
        .download(&record, target.path(), &[], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::WrongProvider { .. }));

    let err = providers
        .get(ArtifactKind::FileShare)
        .unwrap()
        .publish("../escape", source.path(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::InvalidArtifactName(_)));
}

#[tokio::test]
async fn republishing_a_share_artifact_replaces_its_files() {
    let backend = Backend::new();
    let share = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    drop_tree(source.path());
    let providers = providers(&backend, share.path()).await;
    let cancel = CancellationToken::new();
    let provider = providers.get(ArtifactKind::FileShare).unwrap();
    provider.publish("drop", source.path(), &cancel).await.unwrap();

    std::fs::remove_dir_all(source.path().join("docs")).unwrap();
    std::fs::write(source.path().join("logs/build.log"), b"rebuilt").unwrap();
    let record = provider.publish("drop", source.path(), &cancel).await.unwrap();
    assert_eq!(record.files, 2);
    assert_eq!(record.bytes, 9 + 7);

    let target = tempfile::tempdir().unwrap();
    let files = provider.download(&record, target.path(), &[], &cancel).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(!target.path().join("docs/readme.txt").exists());
    assert_eq!(
        std::fs::read(target.path().join("logs/build.log")).unwrap(),
        b"rebuilt"
    );

    let leftovers: Vec<_> = std::fs::read_dir(share.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, ["drop"]);
}
