//! Transfer statistics for upload and download sessions.
//!
//! Counters are `AtomicU64` so concurrent transfer workers can record without
//! locking. A session turns its counters into a plain snapshot when it finishes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Result counters of one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatistics {
    /// Chunks transferred to the store
    pub chunks_uploaded: u64,
    /// Interior nodes transferred to the store
    pub nodes_uploaded: u64,
    /// Content bytes of transferred chunks, before compression
    pub bytes_uploaded: u64,
    /// Chunks the store already had
    pub chunks_present: u64,
    /// Content bytes not transferred because the store or the same upload already had them
    pub bytes_saved_by_dedup: u64,
    /// Bytes not transferred because chunk blobs were compressed
    pub bytes_saved_by_compression: u64,
}

impl UploadStatistics {
    /// Fraction of content bytes that did not need transferring.
    ///
    /// Returns 0.0 if nothing was processed.
    pub fn dedup_ratio(&self) -> f64 {
        let total = self.bytes_uploaded + self.bytes_saved_by_dedup;
        if total == 0 {
            0.0
        } else {
            self.bytes_saved_by_dedup as f64 / total as f64
        }
    }
}

/// Result counters of one download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStatistics {
    /// Files written
    pub files_downloaded: u64,
    /// Chunks fetched from the store
    pub chunks_downloaded: u64,
    /// Node blobs fetched from the store
    pub nodes_downloaded: u64,
    /// Content bytes written to disk
    pub bytes_downloaded: u64,
}

/// Thread-safe counters shared by the workers of one session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    chunks_uploaded: AtomicU64,
    nodes_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    chunks_present: AtomicU64,
    bytes_saved_by_dedup: AtomicU64,
    bytes_saved_by_compression: AtomicU64,
    files_downloaded: AtomicU64,
    chunks_downloaded: AtomicU64,
    nodes_downloaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl SessionMetrics {
    /// Create a new SessionMetrics with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk transferred to the store.
    #[inline]
    pub fn record_chunk_uploaded(&self, content_bytes: u64, stored_bytes: u64) {
        self.chunks_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(content_bytes, Ordering::Relaxed);
        self.bytes_saved_by_compression
            .fetch_add(content_bytes.saturating_sub(stored_bytes), Ordering::Relaxed);
    }

    /// Record a chunk the store already held.
    #[inline]
    pub fn record_chunk_present(&self, content_bytes: u64) {
        self.chunks_present.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved_by_dedup.fetch_add(content_bytes, Ordering::Relaxed);
    }

    /// Record content bytes repeated within the same upload.
    #[inline]
    pub fn record_duplicate(&self, content_bytes: u64) {
        self.bytes_saved_by_dedup.fetch_add(content_bytes, Ordering::Relaxed);
    }

    /// Record an interior node transferred to the store.
    #[inline]
    pub fn record_node_uploaded(&self) {
        self.nodes_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk fetched from the store.
    #[inline]
    pub fn record_chunk_downloaded(&self, content_bytes: u64) {
        self.chunks_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(content_bytes, Ordering::Relaxed);
    }

    /// Record a node blob fetched from the store.
    #[inline]
    pub fn record_node_downloaded(&self) {
        self.nodes_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed file.
    #[inline]
    pub fn record_file_downloaded(&self) {
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time upload counters.
    pub fn upload_snapshot(&self) -> UploadStatistics {
        UploadStatistics {
            chunks_uploaded: self.chunks_uploaded.load(Ordering::Relaxed),
            nodes_uploaded: self.nodes_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            chunks_present: self.chunks_present.load(Ordering::Relaxed),
            bytes_saved_by_dedup: self.bytes_saved_by_dedup.load(Ordering::Relaxed),
            bytes_saved_by_compression: self.bytes_saved_by_compression.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time download counters.
    pub fn download_snapshot(&self) -> DownloadStatistics {
        DownloadStatistics {
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            chunks_downloaded: self.chunks_downloaded.load(Ordering::Relaxed),
            nodes_downloaded: self.nodes_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.chunks_uploaded,
            &self.nodes_uploaded,
            &self.bytes_uploaded,
            &self.chunks_present,
            &self.bytes_saved_by_dedup,
            &self.bytes_saved_by_compression,
            &self.files_downloaded,
            &self.chunks_downloaded,
            &self.nodes_downloaded,
            &self.bytes_downloaded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
