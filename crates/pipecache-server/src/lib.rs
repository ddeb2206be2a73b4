#![warn(missing_docs)]

//! pipecache server: pipeline cache save/restore on top of fingerprints and dedup transfer.
//!
//! Save:    key segments → Key fingerprint (+ salt) → Path fingerprint → publish files → cache entry
//! Restore: key / restore keys → metadata lookup (exact, then prefix) → download manifest

pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod server;

pub use artifact::{
    download_filter, ArtifactKind, ArtifactLocation, ArtifactProvider, ArtifactProviders,
    ArtifactRecord, FileShareProvider, PipelineArtifactProvider,
};
pub use config::CacheConfig;
pub use context::HostContext;
pub use error::{ServerError, ServerResult};
pub use logging::LogFormat;
pub use metadata::{CacheEntry, CacheMetadataService, MemoryCacheMetadata};
pub use server::{PipelineCacheServer, RestoreOutcome, SaveOutcome};
