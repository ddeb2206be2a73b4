//! Error types for the pipecache-dedup subsystem

use std::path::PathBuf;

use pipecache_exec::{BoundedError, Retryable};

use crate::hash::DedupId;

/// Result type alias for dedup operations.
pub type DedupResult<T> = Result<T, DedupError>;

/// Errors reported by a remote content store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has no blob for this identifier
    #[error("Content not found in remote store: {0}")]
    NotFound(DedupId),
    /// A single store call exceeded the configured per-call timeout
    #[error("Remote store call `{op}` timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the store operation
        op: &'static str,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },
    /// The store could not be reached or returned a server-side failure
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the request
    #[error("Remote store rejected request: {0}")]
    Rejected(String),
}

/// All errors that can occur while chunking, hashing, uploading or downloading content
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    /// I/O error reading a source file or writing a target file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The content-defined chunker failed for a reason other than I/O
    #[error("Chunking failed: {0}")]
    Chunking(String),
    /// Chunker sizes outside the range the rolling hash supports
    #[error("Invalid chunker configuration: {0}")]
    InvalidChunkerConfig(String),
    /// A remote store call failed
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),
    /// The operation observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
    /// A string could not be parsed as a content identifier
    #[error("Invalid content identifier `{0}`")]
    InvalidId(String),
    /// A node blob could not be decoded into its children
    #[error("Malformed node blob for {id}: {reason}")]
    MalformedNode {
        /// Identifier of the node blob
        id: DedupId,
        /// What was wrong with it
        reason: String,
    },
    /// Downloaded bytes do not hash to the identifier they were requested by
    #[error("Content mismatch: expected {expected}, remote bytes hash to {actual}")]
    ContentMismatch {
        /// Identifier that was requested
        expected: DedupId,
        /// Identifier of the bytes actually received
        actual: DedupId,
    },
    /// A source file no longer matches the chunk hashes computed for it
    #[error("File {} changed after hashing (chunk {id})", path.display())]
    FileChanged {
        /// Source file
        path: PathBuf,
        /// Chunk whose bytes changed
        id: DedupId,
    },
    /// A chunk in the upload tree has no registered source
    #[error("No source registered for chunk {0}")]
    MissingSource(DedupId),
    /// A batch root was requested for zero files
    #[error("Cannot build a batch root from zero nodes")]
    EmptyBatch,
    /// A manifest item path is empty, escapes its root, or is otherwise unusable
    #[error("Invalid manifest item path `{path}`: {reason}")]
    InvalidItemPath {
        /// The offending logical path
        path: String,
        /// Why it was rejected
        reason: String,
    },
    /// Two manifest items share a logical path
    #[error("Duplicate manifest item path `{0}`")]
    DuplicateItemPath(String),
    /// Manifest (de)serialization failed
    #[error("Manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    /// A stored blob carries a codec tag this build does not know
    #[error("Unknown blob codec tag {0:#04x}")]
    UnknownCodec(u8),
    /// Several independent transfers failed
    #[error("{failed} of {attempted} transfers failed; first error: {first}")]
    Batch {
        /// Transfers that were run
        attempted: usize,
        /// Transfers that failed
        failed: usize,
        /// The first underlying error
        first: Box<DedupError>,
    },
    /// A worker task panicked or could not be joined
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl DedupError {
    /// True if this error reports cancellation rather than a content or network failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            DedupError::Cancelled => true,
            DedupError::Batch { first, .. } => first.is_cancelled(),
            _ => false,
        }
    }
}

impl Retryable for DedupError {
    fn is_cancellation(&self) -> bool {
        self.is_cancelled()
    }

    fn is_transient(&self) -> bool {
        match self {
            DedupError::Io(_) | DedupError::Store(_) | DedupError::TaskFailed(_) => true,
            DedupError::Batch { first, .. } => first.is_transient(),
            _ => false,
        }
    }
}

impl From<BoundedError<DedupError>> for DedupError {
    fn from(e: BoundedError<DedupError>) -> Self {
        match e {
            BoundedError::Cancelled { .. } => DedupError::Cancelled,
            BoundedError::Panicked { index, message } => {
                DedupError::TaskFailed(format!("work item {index} panicked: {message}"))
            }
            BoundedError::Failed {
                attempted,
                failed,
                mut errors,
            } => {
                if errors.iter().any(DedupError::is_cancelled) {
                    return DedupError::Cancelled;
                }
                if errors.len() == 1 {
                    return errors.remove(0);
                }
                let first = if errors.is_empty() {
                    DedupError::TaskFailed("unknown failure".to_string())
                } else {
                    errors.remove(0)
                };
                DedupError::Batch {
                    attempted,
                    failed,
                    first: Box::new(first),
                }
            }
        }
    }
}

impl From<tokio::task::JoinError> for DedupError {
    fn from(e: tokio::task::JoinError) -> Self {
        DedupError::TaskFailed(e.to_string())
    }
}
