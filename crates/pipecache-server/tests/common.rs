//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use pipecache_dedup::{HashType, MemoryContentStore};
use pipecache_server::{CacheConfig, HostContext, MemoryCacheMetadata, PipelineCacheServer};

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

/// Owned string segments
pub fn segments(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Shared backing services, so several workspaces can see the same cache
#[derive(Clone, Default)]
pub struct Backend {
    pub store: Arc<MemoryContentStore>,
    pub metadata: Arc<MemoryCacheMetadata>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn server(&self, workspace: &Path) -> PipelineCacheServer {
        let config = CacheConfig {
            hash_type: Some(HashType::Dedup64K),
            upload_parallelism: 8,
            download_parallelism: 8,
            ..CacheConfig::default()
        };
        let context = HostContext::new(workspace).with_config(config);
        PipelineCacheServer::connect(context, self.store.clone(), self.metadata.clone())
            .await
            .unwrap()
    }
}
