//! Remote content store interface and an in-memory implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::StoreError;
use crate::hash::{DedupId, HashType};
use crate::retention::KeepUntil;

/// Content-addressed blob store reached by upload and download sessions.
///
/// Implementations own transport, authentication and wire format. Blobs are
/// opaque to the store; the sessions encode and verify them.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// True if the store holds a blob for `id`
    async fn exists(&self, id: DedupId) -> Result<bool, StoreError>;

    /// Store `blob` under `id`, retained at least until `keep_until`.
    ///
    /// The blob and its retention reference must become visible together, so a
    /// collection never sees the new blob unreferenced. Storing an existing id only
    /// extends its retention.
    async fn put(&self, id: DedupId, blob: Bytes, keep_until: KeepUntil) -> Result<(), StoreError>;

    /// Fetch the blob stored under `id`
    async fn get(&self, id: DedupId) -> Result<Bytes, StoreError>;

    /// Guarantee `id` is retained at least until `keep_until`
    async fn keep_until(&self, id: DedupId, keep_until: KeepUntil) -> Result<(), StoreError>;

    /// Hash type the store would like new content chunked with
    async fn preferred_hash_type(&self) -> Result<HashType, StoreError> {
        Ok(HashType::default())
    }
}

struct StoredBlob {
    blob: Bytes,
    keep_until: Option<KeepUntil>,
}

/// In-memory content store for local use and tests.
///
/// Counts calls per operation so callers can observe deduplication.
pub struct MemoryContentStore {
    blobs: DashMap<DedupId, StoredBlob>,
    hash_type: HashType,
    exists_calls: AtomicU64,
    put_calls: AtomicU64,
    get_calls: AtomicU64,
}

impl MemoryContentStore {
    /// Create a new empty store preferring the default hash type.
    pub fn new() -> Self {
        Self::with_hash_type(HashType::default())
    }

    /// Create a store that reports `hash_type` as preferred
    pub fn with_hash_type(hash_type: HashType) -> Self {
        Self {
            blobs: DashMap::new(),
            hash_type,
            exists_calls: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
        }
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// True if `id` is stored
    pub fn contains(&self, id: &DedupId) -> bool {
        self.blobs.contains_key(id)
    }

    /// Retention reference recorded for `id`
    pub fn keep_until_of(&self, id: &DedupId) -> Option<KeepUntil> {
        self.blobs.get(id).and_then(|b| b.keep_until)
    }

    /// Raw stored blob for `id`
    pub fn raw_blob(&self, id: &DedupId) -> Option<Bytes> {
        self.blobs.get(id).map(|b| b.blob.clone())
    }

    /// Overwrite a stored blob without any checks. For corruption tests.
    pub fn replace_raw(&self, id: DedupId, blob: Bytes) {
        self.blobs.insert(
            id,
            StoredBlob {
                blob,
                keep_until: None,
            },
        );
    }

    /// Drop a stored blob
    pub fn remove(&self, id: &DedupId) -> bool {
        self.blobs.remove(id).is_some()
    }

    /// Number of successful `put` calls that stored a new blob
    pub fn put_count(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }

    /// Number of `exists` calls
    pub fn exists_count(&self) -> u64 {
        self.exists_calls.load(Ordering::Relaxed)
    }

    /// Number of `get` calls
    pub fn get_count(&self) -> u64 {
        self.get_calls.load(Ordering::Relaxed)
    }

    /// Remove blobs whose retention has expired at `now`. Returns the number removed.
    ///
    /// Blobs that never received a retention reference are removed as well.
    pub fn collect_garbage(&self, now: DateTime<Utc>) -> usize {
        let before = self.blobs.len();
        self.blobs
            .retain(|_, b| b.keep_until.map(|k| !k.is_expired(now)).unwrap_or(false));
        let removed = before - self.blobs.len();
        debug!(removed, remaining = self.blobs.len(), "content store garbage collected");
        removed
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn exists(&self, id: DedupId) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.blobs.contains_key(&id))
    }

    async fn put(&self, id: DedupId, blob: Bytes, keep_until: KeepUntil) -> Result<(), StoreError> {
        match self.blobs.entry(id) {
            Entry::Occupied(mut existing) => {
                let stored = existing.get_mut();
                stored.keep_until = Some(stored.keep_until.map_or(keep_until, |k| k.max(keep_until)));
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredBlob {
                    blob,
                    keep_until: Some(keep_until),
                });
                self.put_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn get(&self, id: DedupId) -> Result<Bytes, StoreError> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.blobs
            .get(&id)
            .map(|b| b.blob.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn keep_until(&self, id: DedupId, keep_until: KeepUntil) -> Result<(), StoreError> {
        match self.blobs.get_mut(&id) {
            Some(mut b) => {
                b.keep_until = Some(b.keep_until.map_or(keep_until, |k| k.max(keep_until)));
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn preferred_hash_type(&self) -> Result<HashType, StoreError> {
        Ok(self.hash_type)
    }
}
