//! Cache entry registry: fingerprint → manifest.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pipecache_dedup::DedupId;
use pipecache_fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ServerResult;

/// One registered cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Fingerprint the entry was saved under
    pub fingerprint: Fingerprint,
    /// Manifest holding the cached files
    pub manifest_id: DedupId,
    /// Registration time
    pub created: DateTime<Utc>,
}

/// Remote cache metadata.
///
/// A lookup fingerprint ending in [`pipecache_fingerprint::WILDCARD`] matches any entry
/// it prefixes; the most recently created match wins.
#[async_trait]
pub trait CacheMetadataService: Send + Sync {
    /// Find the entry for `fingerprint`
    async fn get_cache_entry(&self, fingerprint: &Fingerprint) -> ServerResult<Option<CacheEntry>>;

    /// Register `manifest_id` under `fingerprint`, replacing any existing entry
    async fn put_cache_entry(
        &self,
        fingerprint: &Fingerprint,
        manifest_id: DedupId,
    ) -> ServerResult<CacheEntry>;
}

/// In-process metadata service
#[derive(Debug, Default)]
pub struct MemoryCacheMetadata {
    entries: DashMap<Fingerprint, (u64, CacheEntry)>,
    sequence: AtomicU64,
}

impl MemoryCacheMetadata {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheMetadataService for MemoryCacheMetadata {
    async fn get_cache_entry(&self, fingerprint: &Fingerprint) -> ServerResult<Option<CacheEntry>> {
        if !fingerprint.is_wildcard() {
            return Ok(self.entries.get(fingerprint).map(|e| e.value().1.clone()));
        }
        let found = self
            .entries
            .iter()
            .filter(|e| fingerprint.matches(e.key()))
            .max_by_key(|e| e.value().0)
            .map(|e| e.value().1.clone());
        debug!(lookup = %fingerprint, hit = found.is_some(), "prefix lookup");
        Ok(found)
    }

    async fn put_cache_entry(
        &self,
        fingerprint: &Fingerprint,
        manifest_id: DedupId,
    ) -> ServerResult<CacheEntry> {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            manifest_id,
            created: Utc::now(),
        };
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.entries
            .insert(fingerprint.clone(), (seq, entry.clone()));
        Ok(entry)
    }
}
