//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;

use pipecache_fingerprint::{Fingerprint, FingerprintCreator, FingerprintKind, FingerprintResult};
use tokio_util::sync::CancellationToken;

/// Write `files` (relative path, contents) under `root`
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, data) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }
}

/// Evaluate with a fresh creator and token
pub async fn evaluate(
    root: &Path,
    segments: &[&str],
    kind: FingerprintKind,
) -> FingerprintResult<Fingerprint> {
    let segments: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
    FingerprintCreator::new()
        .evaluate(root, &segments, kind, &CancellationToken::new())
        .await
}
