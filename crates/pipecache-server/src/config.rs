use pipecache_dedup::{CompressionAlgorithm, HashType, SessionConfig, DEFAULT_TRANSFER_PARALLELISM};
use pipecache_exec::{default_parallelism, BoundedOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::logging::LogFormat;

/// Cache server configuration, loaded from `.toml` or `.json`.
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Concurrent chunk/node uploads
    pub upload_parallelism: usize,
    /// Concurrent chunk/node downloads
    pub download_parallelism: usize,
    /// Concurrent files hashed for fingerprints and uploads
    pub hashing_parallelism: usize,
    /// Queue depth ahead of transfer workers
    pub bounded_capacity: usize,
    /// Attempts per upload or download, including the first
    pub max_attempts: u32,
    /// Retention requested for published content
    pub keep_until_hours: u64,
    /// Upper bound on one store call
    pub call_timeout_secs: Option<u64>,
    /// Forces a dedup hash type instead of asking the store
    pub hash_type: Option<HashType>,
    /// Codec for stored chunks
    pub compression: CompressionAlgorithm,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            upload_parallelism: DEFAULT_TRANSFER_PARALLELISM,
            download_parallelism: DEFAULT_TRANSFER_PARALLELISM,
            hashing_parallelism: default_parallelism(),
            bounded_capacity: 2 * DEFAULT_TRANSFER_PARALLELISM,
            max_attempts: 3,
            keep_until_hours: 24,
            call_timeout_secs: None,
            hash_type: None,
            compression: CompressionAlgorithm::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl CacheConfig {
    /// Load from a `.toml` or `.json` file, then validate
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: CacheConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session can run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.upload_parallelism == 0 || self.download_parallelism == 0 {
            anyhow::bail!("transfer parallelism must be at least 1");
        }
        if self.call_timeout_secs == Some(0) {
            anyhow::bail!("call_timeout_secs must be positive when set");
        }
        Ok(())
    }

    /// Install the global tracing subscriber in the configured format
    pub fn init_logging(&self) -> anyhow::Result<()> {
        crate::logging::init(self.log_format)
    }

    /// Per-session settings for the dedup layer
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            upload_parallelism: self.upload_parallelism,
            download_parallelism: self.download_parallelism,
            hashing_parallelism: self.hashing_parallelism,
            bounded_capacity: self.bounded_capacity,
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                ..RetryConfig::default()
            },
            keep_until: Duration::from_secs(self.keep_until_hours.saturating_mul(60 * 60)),
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
            compression: self.compression,
            hash_type: self.hash_type,
        }
    }

    /// Limits for fingerprint file hashing
    pub fn hashing_options(&self) -> BoundedOptions {
        BoundedOptions::new(self.hashing_parallelism, self.hashing_parallelism * 2)
    }
}
