//! Error types for cache server operations

use std::path::PathBuf;

use pipecache_dedup::DedupError;
use pipecache_fingerprint::FingerprintError;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by cache save/restore and artifact providers
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Key or path evaluation failed
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),
    /// Chunking or transfer failed
    #[error("Transfer error: {0}")]
    Dedup(#[from] DedupError),
    /// The cache metadata service failed
    #[error("Cache metadata error: {0}")]
    Metadata(String),
    /// Some files could not be read, so no entry was registered
    #[error("{failed} file(s) could not be published, first: {} ({first_error})", first_path.display())]
    IncompleteSave {
        /// Number of files that failed
        failed: usize,
        /// First failing file
        first_path: PathBuf,
        /// Its error
        first_error: String,
    },
    /// A path to publish lies outside the workspace
    #[error("Path `{0}` is outside the workspace")]
    OutsideWorkspace(String),
    /// Artifact names are single path components
    #[error("Invalid artifact name `{0}`")]
    InvalidArtifactName(String),
    /// No provider is registered for the requested artifact kind
    #[error("No artifact provider registered for {0}")]
    NoProvider(String),
    /// The artifact record does not belong to this provider
    #[error("Artifact `{name}` cannot be read by the {kind} provider")]
    WrongProvider {
        /// Artifact name
        name: String,
        /// Provider kind
        kind: String,
    },
    /// Local filesystem error
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// A blocking worker panicked or could not be joined
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
    /// The operation observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl ServerError {
    /// True if this error reports cancellation from any layer
    pub fn is_cancelled(&self) -> bool {
        match self {
            ServerError::Cancelled => true,
            ServerError::Dedup(e) => e.is_cancelled(),
            ServerError::Fingerprint(FingerprintError::Cancelled) => true,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServerError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<walkdir::Error> for ServerError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(PathBuf::from).unwrap_or_default();
        let source = e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
        ServerError::Io { path, source }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServerError::TaskFailed(e.to_string())
    }
}
