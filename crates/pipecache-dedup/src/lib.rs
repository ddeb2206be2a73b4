#![warn(missing_docs)]

//! pipecache dedup subsystem: content-defined chunking, node trees, deduplicating transfer
//!
//! Upload path:   File → Chunk (FastCDC) → Hash → Node tree → Existence check → Put missing → Keep-until
//! Download path: Manifest → Node blobs (verified) → Chunks (verified) → Temp file → Rename

pub mod chunker;
pub mod compression;
pub mod config;
pub mod download;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod node;
pub mod retention;
pub mod session;
pub mod stats;
pub mod store;
pub mod upload;

#[cfg(test)]
mod testutil;

pub use chunker::{Chunk, ChunkInfo, ChunkStream, Chunker, ChunkerConfig};
pub use compression::CompressionAlgorithm;
pub use config::{SessionConfig, DEFAULT_TRANSFER_PARALLELISM};
pub use download::{DownloadResult, DownloadSession, ItemFilter};
pub use error::{DedupError, DedupResult, StoreError};
pub use hash::{sha256_hex, DedupId, HashAlgorithm, HashType, NodeKind};
pub use manifest::{normalize_item_path, Manifest, ManifestItem};
pub use node::{decode_children, ChildRef, DedupNode, MAX_DIRECT_CHILDREN_PER_NODE};
pub use retention::{KeepUntil, DEFAULT_KEEP_UNTIL};
pub use session::{SessionFactory, StoreClient};
pub use stats::{DownloadStatistics, SessionMetrics, UploadStatistics};
pub use store::{ContentStore, MemoryContentStore};
pub use upload::{
    ChunkSource, ChunkSources, FailedFile, HashedBatch, HashedFile, PublishItem, PublishResult,
    UploadSession,
};
