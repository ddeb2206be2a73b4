//! Cache save/restore across workspaces sharing one backend.

mod common;

use common::{segments, write_tree, Backend};
use pipecache_server::{RestoreOutcome, SaveOutcome, ServerError};

const LOCKFILE: &[u8] = b"{\"lockfileVersion\": 3, \"packages\": {}}";

fn populate(root: &std::path::Path, lockfile: &[u8]) {
    write_tree(
        root,
        &[
            ("package-lock.json", lockfile),
            ("node_modules/left-pad/index.js", b"module.exports = pad"),
            ("node_modules/left-pad/package.json", b"{\"name\": \"left-pad\"}"),
            ("src/app.js", b"require('left-pad')"),
        ],
    );
}

#[tokio::test]
async fn save_then_restore_in_a_fresh_workspace() {
    let backend = Backend::new();
    let first = tempfile::tempdir().unwrap();
    populate(first.path(), LOCKFILE);

    let key = segments(&["npm", "package-lock.json"]);
    let path = segments(&["./node_modules"]);
    let saved = backend
        .server(first.path())
        .await
        .save(&key, &path, None)
        .await
        .unwrap();
    let saved_fingerprint = match saved {
        SaveOutcome::Saved {
            fingerprint, files, ..
        } => {
            assert_eq!(files, 2);
            fingerprint
        }
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(saved_fingerprint.segments()[0], "npm");
    assert_eq!(backend.metadata.len(), 1);

    let second = tempfile::tempdir().unwrap();
    write_tree(second.path(), &[("package-lock.json", LOCKFILE)]);
    let restored = backend
        .server(second.path())
        .await
        .restore(&key, &[], None)
        .await
        .unwrap();
    match restored {
        RestoreOutcome::ExactHit { entry, files, .. } => {
            assert_eq!(entry.fingerprint, saved_fingerprint);
            assert_eq!(files.len(), 2);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(
        std::fs::read(second.path().join("node_modules/left-pad/index.js")).unwrap(),
        b"module.exports = pad"
    );
    assert!(!second.path().join("src/app.js").exists());
}

#[tokio::test]
async fn saving_an_existing_key_is_skipped() {
    let backend = Backend::new();
    let ws = tempfile::tempdir().unwrap();
    populate(ws.path(), LOCKFILE);
    let server = backend.server(ws.path()).await;
    let key = segments(&["npm", "package-lock.json"]);
    let path = segments(&["./node_modules"]);

    server.save(&key, &path, None).await.unwrap();
    let puts = backend.store.put_count();
    let again = server.save(&key, &path, None).await.unwrap();
    assert!(matches!(again, SaveOutcome::AlreadyExists { .. }));
    assert_eq!(backend.store.put_count(), puts);
}

#[tokio::test]
async fn restore_key_gives_partial_hit() {
    let backend = Backend::new();
    let old = tempfile::tempdir().unwrap();
    populate(old.path(), LOCKFILE);
    backend
        .server(old.path())
        .await
        .save(
            &segments(&["npm", "package-lock.json"]),
            &segments(&["./node_modules"]),
            None,
        )
        .await
        .unwrap();

    let new = tempfile::tempdir().unwrap();
    write_tree(new.path(), &[("package-lock.json", b"{\"lockfileVersion\": 3, \"changed\": 1}")]);
    let server = backend.server(new.path()).await;
    let key = segments(&["npm", "package-lock.json"]);

    let miss = server.restore(&key, &[], None).await.unwrap();
    assert!(!miss.is_hit());

    let partial = server
        .restore(&key, &[segments(&["yarn"]), segments(&["npm"])], None)
        .await
        .unwrap();
    match partial {
        RestoreOutcome::PartialHit {
            restore_key, files, ..
        } => {
            assert_eq!(restore_key.segments(), ["npm", "**"]);
            assert_eq!(files.len(), 2);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(new.path().join("node_modules/left-pad/package.json").exists());
}

#[tokio::test]
async fn salt_separates_entries() {
    let backend = Backend::new();
    let ws = tempfile::tempdir().unwrap();
    populate(ws.path(), LOCKFILE);
    let server = backend.server(ws.path()).await;
    let key = segments(&["npm", "package-lock.json"]);

    let saved = server
        .save(&key, &segments(&["./node_modules"]), Some("v1"))
        .await
        .unwrap();
    match saved {
        SaveOutcome::Saved { fingerprint, .. } => {
            assert_eq!(fingerprint.segments()[0], "salt=v1");
        }
        other => panic!("unexpected: {other:?}"),
    }

    let other_salt = server.restore(&key, &[], Some("v2")).await.unwrap();
    assert!(matches!(other_salt, RestoreOutcome::Miss { .. }));
    let same_salt = server.restore(&key, &[], Some("v1")).await.unwrap();
    assert!(matches!(same_salt, RestoreOutcome::ExactHit { .. }));
}

#[tokio::test]
async fn paths_outside_the_workspace_are_refused() {
    let backend = Backend::new();
    let outer = tempfile::tempdir().unwrap();
    write_tree(
        outer.path(),
        &[("ws/package-lock.json", LOCKFILE), ("elsewhere/a.txt", b"a")],
    );
    let err = backend
        .server(&outer.path().join("ws"))
        .await
        .save(
            &segments(&["npm", "package-lock.json"]),
            &segments(&["../elsewhere/*.txt"]),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::OutsideWorkspace(ref p) if p == "../elsewhere/a.txt"));
    assert!(backend.metadata.is_empty());
}

#[tokio::test]
async fn key_errors_surface_before_any_upload() {
    let backend = Backend::new();
    let ws = tempfile::tempdir().unwrap();
    let err = backend
        .server(ws.path())
        .await
        .save(&segments(&["npm", "**"]), &segments(&["./node_modules"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Fingerprint(_)));
    assert!(backend.store.is_empty());
}
