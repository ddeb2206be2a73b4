//! Error types for fingerprint evaluation

use std::path::PathBuf;

use pipecache_exec::BoundedError;

/// Result type alias for fingerprint operations.
pub type FingerprintResult<T> = Result<T, FingerprintError>;

/// Errors raised while parsing key segments or evaluating a fingerprint.
///
/// Everything except [`FingerprintError::Io`], [`FingerprintError::TaskFailed`] and
/// [`FingerprintError::Cancelled`] is a configuration error and names the segment or
/// pattern at fault.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// A segment equals one of the reserved wildcard tokens
    #[error("Key segment `{0}` is reserved; write `./{0}` to match files")]
    ReservedSegment(String),
    /// A segment is empty or whitespace only
    #[error("Key segment {index} is empty")]
    EmptySegment {
        /// Zero-based position of the segment
        index: usize,
    },
    /// A segment starts with the quote character reserved for internal literal marking
    #[error("Key segment `{0}` may not start with a single quote")]
    ReservedQuote(String),
    /// A segment opens a double-quoted literal but never closes it
    #[error("Key segment `{0}` starts with `\"` but has no closing quote")]
    UnterminatedQuote(String),
    /// A path segment has only exclude rules
    #[error("Path segment `{0}` has no include rules")]
    NoIncludeRules(String),
    /// A glob rule could not be compiled
    #[error("Invalid glob pattern `{pattern}`: {reason}")]
    InvalidGlob {
        /// The offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
    /// One or more path segments matched no files
    #[error("No files matched key segment(s): {}", .0.join(", "))]
    NoMatches(Vec<String>),
    /// Matched paths span roots that cannot share one relative base
    #[error("Path segment `{segment}` matches paths under unrelated roots: {}", roots.join(", "))]
    AmbiguousRelativeBase {
        /// The offending segment
        segment: String,
        /// The distinct enumeration roots involved
        roots: Vec<String>,
    },
    /// Enumeration or hashing hit an I/O error
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// A hashing task panicked or could not be joined
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
    /// Evaluation observed its cancellation token
    #[error("Fingerprint evaluation cancelled")]
    Cancelled,
}

impl FingerprintError {
    /// True for caller mistakes that retrying cannot fix
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            FingerprintError::Io { .. } | FingerprintError::TaskFailed(_) | FingerprintError::Cancelled
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FingerprintError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<walkdir::Error> for FingerprintError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(PathBuf::from).unwrap_or_default();
        let source = e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
        FingerprintError::Io { path, source }
    }
}

impl From<BoundedError<FingerprintError>> for FingerprintError {
    fn from(e: BoundedError<FingerprintError>) -> Self {
        match e {
            BoundedError::Cancelled { .. } => FingerprintError::Cancelled,
            BoundedError::Panicked { index, message } => {
                FingerprintError::TaskFailed(format!("hashing item {index} panicked: {message}"))
            }
            BoundedError::Failed { mut errors, .. } => {
                if errors.iter().any(|e| matches!(e, FingerprintError::Cancelled)) {
                    return FingerprintError::Cancelled;
                }
                if errors.is_empty() {
                    FingerprintError::TaskFailed("unknown failure".to_string())
                } else {
                    errors.remove(0)
                }
            }
        }
    }
}

impl From<tokio::task::JoinError> for FingerprintError {
    fn from(e: tokio::task::JoinError) -> Self {
        FingerprintError::TaskFailed(e.to_string())
    }
}
