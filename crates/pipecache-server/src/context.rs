//! Typed host context handed to the cache server

use std::path::{Path, PathBuf};

use pipecache_fingerprint::FingerprintCreator;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;

/// Everything the host supplies: where the workspace is, how to resolve relative rules,
/// settings, and the job's cancellation token.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// Root that fingerprints are evaluated under and restores land in
    pub workspace_root: PathBuf,
    /// Base for relative key and path rules; `None` uses the workspace root
    pub default_working_directory: Option<PathBuf>,
    /// Server settings
    pub config: CacheConfig,
    /// Cancels every operation started from this context
    pub cancel: CancellationToken,
}

impl HostContext {
    /// Context with default config and a fresh token
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            default_working_directory: None,
            config: CacheConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Resolve relative rules against `dir`
    pub fn with_default_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_working_directory = Some(dir.into());
        self
    }

    /// Replace the settings
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.workspace_root
    }

    /// Evaluator configured from this context
    pub fn fingerprint_creator(&self) -> FingerprintCreator {
        let creator = FingerprintCreator::new().with_hashing_options(self.config.hashing_options());
        match &self.default_working_directory {
            Some(dir) => creator.with_default_working_directory(dir.clone()),
            None => creator,
        }
    }
}
