//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use pipecache_dedup::{
    ContentStore, DedupId, HashType, KeepUntil, MemoryContentStore, SessionConfig, StoreError,
};
use pipecache_exec::RetryConfig;

/// SplitMix64 byte stream: little-endian words, truncated to `len`
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        out.extend_from_slice(&z.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Write `files` (relative path, contents) under `root`
pub fn write_tree(root: &Path, files: &[(&str, Vec<u8>)]) {
    for (rel, data) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }
}

/// Session config with fast backoff for tests
pub fn fast_config(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        retry: RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..RetryConfig::default()
        },
        hash_type: Some(HashType::Dedup64K),
        ..SessionConfig::default()
    }
}

/// Store wrapper that fails the first `failing_puts` calls to `put`
pub struct FlakyStore {
    pub inner: MemoryContentStore,
    failing_puts: AtomicU32,
    pub put_attempts: AtomicU64,
}

impl FlakyStore {
    pub fn new(failing_puts: u32) -> Self {
        Self {
            inner: MemoryContentStore::new(),
            failing_puts: AtomicU32::new(failing_puts),
            put_attempts: AtomicU64::new(0),
        }
    }

    pub fn shared(failing_puts: u32) -> Arc<Self> {
        Arc::new(Self::new(failing_puts))
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn exists(&self, id: DedupId) -> Result<bool, StoreError> {
        self.inner.exists(id).await
    }

    async fn put(&self, id: DedupId, blob: Bytes, keep_until: KeepUntil) -> Result<(), StoreError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected put failure".to_string()));
        }
        self.inner.put(id, blob, keep_until).await
    }

    async fn get(&self, id: DedupId) -> Result<Bytes, StoreError> {
        self.inner.get(id).await
    }

    async fn keep_until(&self, id: DedupId, keep_until: KeepUntil) -> Result<(), StoreError> {
        self.inner.keep_until(id, keep_until).await
    }
}

/// Store wrapper that runs a garbage collection right after every `exists` and
/// `put`, and records the order of calls
#[derive(Default)]
pub struct CollectingStore {
    pub inner: MemoryContentStore,
    pub calls: Mutex<Vec<&'static str>>,
}

impl CollectingStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }
}

#[async_trait]
impl ContentStore for CollectingStore {
    async fn exists(&self, id: DedupId) -> Result<bool, StoreError> {
        self.record("exists");
        let found = self.inner.exists(id).await;
        self.inner.collect_garbage(Utc::now());
        found
    }

    async fn put(&self, id: DedupId, blob: Bytes, keep_until: KeepUntil) -> Result<(), StoreError> {
        self.record("put");
        self.inner.put(id, blob, keep_until).await?;
        self.inner.collect_garbage(Utc::now());
        Ok(())
    }

    async fn get(&self, id: DedupId) -> Result<Bytes, StoreError> {
        self.inner.get(id).await
    }

    async fn keep_until(&self, id: DedupId, keep_until: KeepUntil) -> Result<(), StoreError> {
        self.record("keep_until");
        self.inner.keep_until(id, keep_until).await
    }
}
