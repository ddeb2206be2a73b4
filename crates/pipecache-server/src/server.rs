//! Pipeline cache save/restore.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use pipecache_dedup::{ContentStore, DedupId, DownloadStatistics, SessionFactory, UploadStatistics};
use pipecache_fingerprint::{lexical_normalize, Fingerprint, FingerprintKind};
use tracing::{info, instrument};

use crate::artifact::{download_filter, ensure_complete, publish_items};
use crate::context::HostContext;
use crate::error::{ServerError, ServerResult};
use crate::metadata::{CacheEntry, CacheMetadataService};

/// Result of [`PipelineCacheServer::save`]
#[derive(Debug)]
pub enum SaveOutcome {
    /// An entry for the key already exists; nothing was uploaded
    AlreadyExists {
        /// Key fingerprint
        fingerprint: Fingerprint,
    },
    /// Files were published and the entry registered
    Saved {
        /// Key fingerprint
        fingerprint: Fingerprint,
        /// Manifest of the cached files
        manifest_id: DedupId,
        /// Number of files cached
        files: usize,
        /// Transfer counters
        statistics: UploadStatistics,
    },
}

/// Result of [`PipelineCacheServer::restore`]
#[derive(Debug)]
pub enum RestoreOutcome {
    /// The primary key matched an entry
    ExactHit {
        /// Entry restored
        entry: CacheEntry,
        /// Files written
        files: Vec<PathBuf>,
        /// Transfer counters
        statistics: DownloadStatistics,
    },
    /// A restore key matched by prefix
    PartialHit {
        /// Entry restored
        entry: CacheEntry,
        /// Restore key lookup that matched, ending in the wildcard
        restore_key: Fingerprint,
        /// Files written
        files: Vec<PathBuf>,
        /// Transfer counters
        statistics: DownloadStatistics,
    },
    /// Nothing matched
    Miss {
        /// Primary key fingerprint
        fingerprint: Fingerprint,
    },
}

impl RestoreOutcome {
    /// True for exact and partial hits
    pub fn is_hit(&self) -> bool {
        !matches!(self, RestoreOutcome::Miss { .. })
    }
}

/// Saves and restores workspace files keyed by content fingerprints
pub struct PipelineCacheServer {
    context: HostContext,
    factory: Arc<SessionFactory>,
    metadata: Arc<dyn CacheMetadataService>,
}

impl PipelineCacheServer {
    /// Connect sessions to `store` using the context's settings
    pub async fn connect(
        context: HostContext,
        store: Arc<dyn ContentStore>,
        metadata: Arc<dyn CacheMetadataService>,
    ) -> ServerResult<Self> {
        let factory =
            SessionFactory::connect(store, context.config.to_session_config(), &context.cancel)
                .await?;
        Ok(Self {
            context,
            factory: Arc::new(factory),
            metadata,
        })
    }

    /// Host context
    pub fn context(&self) -> &HostContext {
        &self.context
    }

    /// Shared session factory, e.g. for a pipeline artifact provider
    pub fn session_factory(&self) -> Arc<SessionFactory> {
        Arc::clone(&self.factory)
    }

    /// Key fingerprint with the salt, if any, as the first slot
    pub async fn key_fingerprint(
        &self,
        key: &[String],
        salt: Option<&str>,
    ) -> ServerResult<Fingerprint> {
        let mut fingerprint = self
            .context
            .fingerprint_creator()
            .evaluate(
                self.context.root(),
                key,
                FingerprintKind::Key,
                &self.context.cancel,
            )
            .await?;
        if let Some(salt) = salt.filter(|s| !s.is_empty()) {
            fingerprint.prepend(format!("salt={salt}"));
        }
        Ok(fingerprint)
    }

    /// Cache the files matched by `path` under the fingerprint of `key`.
    ///
    /// Directories matched by `path` are cached recursively. If any file cannot be read
    /// the entry is not registered.
    #[instrument(skip_all)]
    pub async fn save(
        &self,
        key: &[String],
        path: &[String],
        salt: Option<&str>,
    ) -> ServerResult<SaveOutcome> {
        let fingerprint = self.key_fingerprint(key, salt).await?;
        if self.metadata.get_cache_entry(&fingerprint).await?.is_some() {
            info!(key = %fingerprint, "cache entry already exists, skipping save");
            return Ok(SaveOutcome::AlreadyExists { fingerprint });
        }

        let paths = self
            .context
            .fingerprint_creator()
            .evaluate(
                self.context.root(),
                path,
                FingerprintKind::Path,
                &self.context.cancel,
            )
            .await?;

        let root = lexical_normalize(self.context.root());
        let mut relative = Vec::with_capacity(paths.segments().len());
        for segment in paths.segments() {
            if segment == ".." || segment.starts_with("../") || !PathBuf::from(segment).is_relative() {
                return Err(ServerError::OutsideWorkspace(segment.clone()));
            }
            relative.push(segment.clone());
        }
        let items = tokio::task::spawn_blocking(move || {
            let mut by_logical = BTreeMap::new();
            for segment in relative {
                let target = lexical_normalize(&root.join(&segment));
                for item in publish_items(&root, &target)? {
                    by_logical.entry(item.logical_path.clone()).or_insert(item);
                }
            }
            Ok::<_, ServerError>(by_logical.into_values().collect::<Vec<_>>())
        })
        .await??;

        let result = self
            .factory
            .create_upload_session()
            .publish(items, &self.context.cancel)
            .await?;
        ensure_complete(&result.failed)?;

        self.metadata
            .put_cache_entry(&fingerprint, result.manifest_id)
            .await?;
        info!(
            key = %fingerprint,
            manifest = %result.manifest_id,
            files = result.manifest.len(),
            uploaded = result.statistics.bytes_uploaded,
            "saved cache entry"
        );
        Ok(SaveOutcome::Saved {
            fingerprint,
            manifest_id: result.manifest_id,
            files: result.manifest.len(),
            statistics: result.statistics,
        })
    }

    /// Restore the entry for `key`, else the most recent entry prefixed by one of
    /// `restore_keys` (tried in order), into the workspace.
    #[instrument(skip_all)]
    pub async fn restore(
        &self,
        key: &[String],
        restore_keys: &[Vec<String>],
        salt: Option<&str>,
    ) -> ServerResult<RestoreOutcome> {
        let fingerprint = self.key_fingerprint(key, salt).await?;
        if let Some(entry) = self.metadata.get_cache_entry(&fingerprint).await? {
            let (files, statistics) = self.download(entry.manifest_id).await?;
            info!(key = %fingerprint, files = files.len(), "cache hit");
            return Ok(RestoreOutcome::ExactHit {
                entry,
                files,
                statistics,
            });
        }

        for restore_key in restore_keys {
            let lookup = self.key_fingerprint(restore_key, salt).await?.with_wildcard();
            if let Some(entry) = self.metadata.get_cache_entry(&lookup).await? {
                let (files, statistics) = self.download(entry.manifest_id).await?;
                info!(restore_key = %lookup, matched = %entry.fingerprint, "partial cache hit");
                return Ok(RestoreOutcome::PartialHit {
                    entry,
                    restore_key: lookup,
                    files,
                    statistics,
                });
            }
        }

        info!(key = %fingerprint, "cache miss");
        Ok(RestoreOutcome::Miss { fingerprint })
    }

    async fn download(
        &self,
        manifest_id: DedupId,
    ) -> ServerResult<(Vec<PathBuf>, DownloadStatistics)> {
        let result = self
            .factory
            .create_download_session()
            .download_manifest(
                manifest_id,
                self.context.root(),
                download_filter(&[])?,
                &self.context.cancel,
            )
            .await?;
        Ok((result.files, result.statistics))
    }
}
