//! Per-session transfer configuration.

use std::time::Duration;

use pipecache_exec::{default_parallelism, BoundedOptions, RetryConfig};

use crate::compression::CompressionAlgorithm;
use crate::hash::HashType;
use crate::retention::DEFAULT_KEEP_UNTIL;

/// Default number of concurrent store transfers per session
pub const DEFAULT_TRANSFER_PARALLELISM: usize = 192;

/// Settings shared by upload and download sessions built from one factory
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Concurrent chunk/node uploads
    pub upload_parallelism: usize,
    /// Concurrent chunk/node downloads
    pub download_parallelism: usize,
    /// Concurrent files being chunked and hashed
    pub hashing_parallelism: usize,
    /// Queue depth ahead of the transfer workers
    pub bounded_capacity: usize,
    /// Retry policy wrapped around each whole upload or download
    pub retry: RetryConfig,
    /// Retention requested for every published identifier
    pub keep_until: Duration,
    /// Upper bound on a single store call, none by default
    pub call_timeout: Option<Duration>,
    /// Codec for stored chunk blobs
    pub compression: CompressionAlgorithm,
    /// Forces a hash type instead of asking the store
    pub hash_type: Option<HashType>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            upload_parallelism: DEFAULT_TRANSFER_PARALLELISM,
            download_parallelism: DEFAULT_TRANSFER_PARALLELISM,
            hashing_parallelism: default_parallelism(),
            bounded_capacity: 2 * DEFAULT_TRANSFER_PARALLELISM,
            retry: RetryConfig::default(),
            keep_until: DEFAULT_KEEP_UNTIL,
            call_timeout: None,
            compression: CompressionAlgorithm::default(),
            hash_type: None,
        }
    }
}

impl SessionConfig {
    pub(crate) fn upload_options(&self) -> BoundedOptions {
        BoundedOptions::new(self.upload_parallelism, self.bounded_capacity)
    }

    pub(crate) fn download_options(&self) -> BoundedOptions {
        BoundedOptions::new(self.download_parallelism, self.bounded_capacity)
    }

    pub(crate) fn hashing_options(&self) -> BoundedOptions {
        BoundedOptions::new(self.hashing_parallelism, self.bounded_capacity)
    }
}
