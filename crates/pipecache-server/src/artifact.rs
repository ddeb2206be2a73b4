//! Artifact providers: publish a directory under a name, download it back filtered.
//!
//! [`ArtifactKind::Pipeline`] goes through the deduplicating store as a manifest;
//! [`ArtifactKind::FileShare`] copies plain files to a share directory. Both apply the
//! same minimatch download filters.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pipecache_dedup::{DedupId, FailedFile, ItemFilter, PublishItem, SessionFactory};
use pipecache_fingerprint::{to_slash, GlobFilter};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::error::{ServerError, ServerResult};

/// Where an artifact lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Deduplicated content store
    Pipeline,
    /// Plain directory on a file share
    FileShare,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Pipeline => write!(f, "pipeline"),
            ArtifactKind::FileShare => write!(f, "fileshare"),
        }
    }
}

/// Provider-specific address of a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactLocation {
    /// Manifest in the content store
    Manifest(DedupId),
    /// Directory on the share
    Share(PathBuf),
}

/// A published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact name
    pub name: String,
    /// Provider that holds it
    pub kind: ArtifactKind,
    /// Where it is
    pub location: ArtifactLocation,
    /// Number of files
    pub files: usize,
    /// Total file bytes
    pub bytes: u64,
}

/// Publish and download artifacts of one kind
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// Kind served by this provider
    fn kind(&self) -> ArtifactKind;

    /// Publish every file under `source` as artifact `name`
    async fn publish(
        &self,
        name: &str,
        source: &Path,
        cancel: &CancellationToken,
    ) -> ServerResult<ArtifactRecord>;

    /// Download the files of `record` accepted by `patterns` into `target`
    async fn download(
        &self,
        record: &ArtifactRecord,
        target: &Path,
        patterns: &[String],
        cancel: &CancellationToken,
    ) -> ServerResult<Vec<PathBuf>>;
}

/// Providers keyed by kind
#[derive(Default, Clone)]
pub struct ArtifactProviders {
    providers: HashMap<ArtifactKind, Arc<dyn ArtifactProvider>>,
}

impl ArtifactProviders {
    /// No providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the provider for its kind
    pub fn register(&mut self, provider: Arc<dyn ArtifactProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Provider for `kind`
    pub fn get(&self, kind: ArtifactKind) -> ServerResult<Arc<dyn ArtifactProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ServerError::NoProvider(kind.to_string()))
    }
}

/// Compile minimatch download patterns over artifact-relative paths.
///
/// `!` marks an exclude. No patterns accepts everything; only excludes means "everything
/// except". A leading `/` on item paths is ignored.
pub fn download_filter(patterns: &[String]) -> ServerResult<Arc<ItemFilter>> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        match pattern.strip_prefix('!') {
            Some(p) => exclude.push(p.trim_start_matches('/').to_string()),
            None => include.push(pattern.trim_start_matches('/').to_string()),
        }
    }
    if include.is_empty() {
        include.push("**".to_string());
    }
    let globs = GlobFilter::new(include, exclude)?;
    let filter: Arc<ItemFilter> =
        Arc::new(move |path: &str| globs.matches(path.trim_start_matches('/')));
    Ok(filter)
}

fn validate_name(name: &str) -> ServerResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(&['/', '\\', '\0'][..]);
    if bad {
        return Err(ServerError::InvalidArtifactName(name.to_string()));
    }
    Ok(())
}

/// Files under `path` as publish items named by their position under `base`
/// (`/`-rooted, `/`-separated). `path` may be a single file.
pub(crate) fn publish_items(base: &Path, path: &Path) -> ServerResult<Vec<PublishItem>> {
    let mut items = Vec::new();
    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| ServerError::OutsideWorkspace(entry.path().display().to_string()))?;
        items.push(PublishItem {
            logical_path: format!("/{}", to_slash(rel)),
            path: entry.path().to_path_buf(),
        });
    }
    Ok(items)
}

/// Refuse a publish that left files out
pub(crate) fn ensure_complete(failed: &[FailedFile]) -> ServerResult<()> {
    match failed.first() {
        Some(first) => Err(ServerError::IncompleteSave {
            failed: failed.len(),
            first_path: first.path.clone(),
            first_error: first.error.to_string(),
        }),
        None => Ok(()),
    }
}

/// Artifacts stored as manifests in the deduplicating content store
pub struct PipelineArtifactProvider {
    factory: Arc<SessionFactory>,
}

impl PipelineArtifactProvider {
    /// Provider over connected sessions
    pub fn new(factory: Arc<SessionFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl ArtifactProvider for PipelineArtifactProvider {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Pipeline
    }

    #[instrument(skip(self, source, cancel), fields(source = %source.display()))]
    async fn publish(
        &self,
        name: &str,
        source: &Path,
        cancel: &CancellationToken,
    ) -> ServerResult<ArtifactRecord> {
        validate_name(name)?;
        let items = {
            let source = source.to_path_buf();
            tokio::task::spawn_blocking(move || publish_items(&source, &source)).await??
        };
        let result = self
            .factory
            .create_upload_session()
            .publish(items, cancel)
            .await?;
        ensure_complete(&result.failed)?;
        info!(manifest = %result.manifest_id, files = result.manifest.len(), "published pipeline artifact");
        Ok(ArtifactRecord {
            name: name.to_string(),
            kind: ArtifactKind::Pipeline,
            location: ArtifactLocation::Manifest(result.manifest_id),
            files: result.manifest.len(),
            bytes: result.manifest.total_size(),
        })
    }

    async fn download(
        &self,
        record: &ArtifactRecord,
        target: &Path,
        patterns: &[String],
        cancel: &CancellationToken,
    ) -> ServerResult<Vec<PathBuf>> {
        let ArtifactLocation::Manifest(manifest_id) = record.location else {
            return Err(ServerError::WrongProvider {
                name: record.name.clone(),
                kind: self.kind().to_string(),
            });
        };
        let result = self
            .factory
            .create_download_session()
            .download_manifest(manifest_id, target, download_filter(patterns)?, cancel)
            .await?;
        Ok(result.files)
    }
}

/// Artifacts copied as plain files to `share_root/<name>`
pub struct FileShareProvider {
    share_root: PathBuf,
}

impl FileShareProvider {
    /// Provider writing under `share_root`
    pub fn new(share_root: impl Into<PathBuf>) -> Self {
        Self {
            share_root: share_root.into(),
        }
    }
}

fn copy_file(from: &Path, to: &Path) -> ServerResult<u64> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ServerError::io(parent, e))?;
    }
    std::fs::copy(from, to).map_err(|e| ServerError::io(from, e))
}

fn copy_tree(
    source: &Path,
    target: &Path,
    filter: &ItemFilter,
    cancel: &CancellationToken,
) -> ServerResult<(Vec<PathBuf>, u64)> {
    let mut copied = Vec::new();
    let mut bytes = 0;
    for item in publish_items(source, source)? {
        if cancel.is_cancelled() {
            return Err(ServerError::Cancelled);
        }
        if !filter(&item.logical_path) {
            continue;
        }
        let dest = target.join(item.logical_path.trim_start_matches('/'));
        bytes += copy_file(&item.path, &dest)?;
        copied.push(dest);
    }
    Ok((copied, bytes))
}

/// Copy `source` into `share_root/name`, replacing any earlier artifact of that name.
///
/// Files are staged next to the destination and swapped in only once every copy
/// succeeded; a failed publish leaves the previous artifact untouched.
fn publish_to_share(
    source: &Path,
    share_root: &Path,
    name: &str,
    cancel: &CancellationToken,
) -> ServerResult<(usize, u64)> {
    std::fs::create_dir_all(share_root).map_err(|e| ServerError::io(share_root, e))?;
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{name}.staging-"))
        .tempdir_in(share_root)
        .map_err(|e| ServerError::io(share_root, e))?;
    let (files, bytes) = copy_tree(source, staging.path(), &|_: &str| true, cancel)?;

    let dest = share_root.join(name);
    let retired = if dest.exists() {
        let retired = tempfile::Builder::new()
            .prefix(&format!(".{name}.retired-"))
            .tempdir_in(share_root)
            .map_err(|e| ServerError::io(share_root, e))?;
        std::fs::rename(&dest, retired.path().join(name)).map_err(|e| ServerError::io(&dest, e))?;
        debug!(share = %dest.display(), "replacing earlier artifact");
        Some(retired)
    } else {
        None
    };
    std::fs::rename(staging.path(), &dest).map_err(|e| ServerError::io(&dest, e))?;
    drop(retired);
    Ok((files.len(), bytes))
}

#[async_trait]
impl ArtifactProvider for FileShareProvider {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::FileShare
    }

    async fn publish(
        &self,
        name: &str,
        source: &Path,
        cancel: &CancellationToken,
    ) -> ServerResult<ArtifactRecord> {
        validate_name(name)?;
        let dest = self.share_root.join(name);
        let (source, share_root, owned_name, token) = (
            source.to_path_buf(),
            self.share_root.clone(),
            name.to_string(),
            cancel.clone(),
        );
        let (files, bytes) = tokio::task::spawn_blocking(move || {
            publish_to_share(&source, &share_root, &owned_name, &token)
        })
        .await??;
        debug!(share = %dest.display(), files, "published file share artifact");
        Ok(ArtifactRecord {
            name: name.to_string(),
            kind: ArtifactKind::FileShare,
            location: ArtifactLocation::Share(dest),
            files,
            bytes,
        })
    }

    async fn download(
        &self,
        record: &ArtifactRecord,
        target: &Path,
        patterns: &[String],
        cancel: &CancellationToken,
    ) -> ServerResult<Vec<PathBuf>> {
        let ArtifactLocation::Share(share) = &record.location else {
            return Err(ServerError::WrongProvider {
                name: record.name.clone(),
                kind: self.kind().to_string(),
            });
        };
        let filter = download_filter(patterns)?;
        let (source, target, token) = (share.clone(), target.to_path_buf(), cancel.clone());
        let (files, _) =
            tokio::task::spawn_blocking(move || copy_tree(&source, &target, &*filter, &token))
                .await??;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_patterns_accept_everything() {
        let f = download_filter(&[]).unwrap();
        assert!(f("/a/b/c.bin"));
        assert!(f("/top.txt"));
    }

    #[test]
    fn includes_and_excludes() {
        let f = download_filter(&patterns(&["**/*.txt", "!**/tmp/**"])).unwrap();
        assert!(f("/a.txt"));
        assert!(f("/docs/b.txt"));
        assert!(!f("/docs/tmp/c.txt"));
        assert!(!f("/bin/tool"));

        let only_exclude = download_filter(&patterns(&["!*.log"])).unwrap();
        assert!(only_exclude("/keep/me.bin"));
        assert!(!only_exclude("/build.log"));
    }

    #[test]
    fn names_must_be_single_components() {
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(validate_name(bad).is_err(), "{bad:?}");
        }
        assert!(validate_name("drop-1.2").is_ok());
    }

    #[test]
    fn publish_items_are_rooted_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/2.txt"), b"2").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        let items = publish_items(dir.path(), dir.path()).unwrap();
        let logical: Vec<_> = items.iter().map(|i| i.logical_path.as_str()).collect();
        assert_eq!(logical, vec!["/a.txt", "/b/2.txt"]);

        let single = publish_items(dir.path(), &dir.path().join("a.txt")).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].logical_path, "/a.txt");
    }

    #[test]
    fn any_failed_file_refuses_the_publish() {
        assert!(ensure_complete(&[]).is_ok());
        let failed = vec![FailedFile {
            path: PathBuf::from("/w/locked.bin"),
            error: pipecache_dedup::DedupError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )),
        }];
        match ensure_complete(&failed) {
            Err(ServerError::IncompleteSave { failed, first_path, .. }) => {
                assert_eq!(failed, 1);
                assert_eq!(first_path, PathBuf::from("/w/locked.bin"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_kind() {
        let share = tempfile::tempdir().unwrap();
        let mut providers = ArtifactProviders::new();
        providers.register(Arc::new(FileShareProvider::new(share.path())));
        assert_eq!(
            providers.get(ArtifactKind::FileShare).unwrap().kind(),
            ArtifactKind::FileShare
        );
        assert!(matches!(
            providers.get(ArtifactKind::Pipeline),
            Err(ServerError::NoProvider(_))
        ));
    }
}
