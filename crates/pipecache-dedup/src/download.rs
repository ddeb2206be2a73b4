//! Download session: reconstruct files from a content store.
//!
//! Every node blob and chunk is verified against the identifier it was
//! requested by. A file is written to a temporary sibling and renamed into
//! place only after all of its chunks verified.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use pipecache_exec::{run_bounded, RetryExecutor};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::compression::decode_blob;
use crate::config::SessionConfig;
use crate::error::{DedupError, DedupResult};
use crate::hash::{DedupId, NodeKind};
use crate::manifest::Manifest;
use crate::node::{decode_children, ChildRef};
use crate::session::StoreClient;
use crate::stats::{DownloadStatistics, SessionMetrics};

/// Chunk fetches kept in flight per file
const CHUNKS_IN_FLIGHT_PER_FILE: usize = 8;

/// Predicate over manifest item paths selecting what to download
pub type ItemFilter = dyn Fn(&str) -> bool + Send + Sync;

/// Outcome of [`DownloadSession::download_manifest`]
#[derive(Debug)]
pub struct DownloadResult {
    /// The manifest that was read
    pub manifest: Manifest,
    /// Files written, in manifest order
    pub files: Vec<PathBuf>,
    /// Transfer counters
    pub statistics: DownloadStatistics,
}

/// One download session over a content store
pub struct DownloadSession {
    id: Uuid,
    client: StoreClient,
    config: SessionConfig,
}

impl DownloadSession {
    pub(crate) fn new(client: StoreClient, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            config,
        }
    }

    /// Session identifier, used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Read and parse a manifest
    pub async fn fetch_manifest(
        &self,
        manifest_id: DedupId,
        cancel: &CancellationToken,
    ) -> DedupResult<Manifest> {
        let metrics = SessionMetrics::new();
        let data = read_content(&self.client, manifest_id, &metrics, cancel).await?;
        Manifest::from_json(&data)
    }

    /// Reconstruct the content under `id` into `target`.
    #[instrument(skip(self, target, cancel), fields(session = %self.id, target = %target.display()))]
    pub async fn download_blob(
        &self,
        id: DedupId,
        target: &Path,
        cancel: &CancellationToken,
    ) -> DedupResult<DownloadStatistics> {
        let executor = RetryExecutor::new(self.config.retry.clone());
        executor
            .execute(cancel, |_| async move {
                let metrics = SessionMetrics::new();
                write_file(&self.client, id, target, &metrics, cancel).await?;
                Ok::<_, DedupError>(metrics.download_snapshot())
            })
            .await
            .into_result(|| DedupError::Cancelled)
    }

    /// Reconstruct the manifest items accepted by `filter` under `target_dir`.
    ///
    /// Item `/a/b` lands at `target_dir/a/b`; intermediate directories are created.
    #[instrument(skip(self, target_dir, filter, cancel), fields(session = %self.id, manifest = %manifest_id))]
    pub async fn download_manifest(
        &self,
        manifest_id: DedupId,
        target_dir: &Path,
        filter: Arc<ItemFilter>,
        cancel: &CancellationToken,
    ) -> DedupResult<DownloadResult> {
        let executor = RetryExecutor::new(self.config.retry.clone());
        let result = executor
            .execute(cancel, |attempt| {
                let filter = Arc::clone(&filter);
                async move {
                    if attempt > 1 {
                        debug!(attempt, "retrying download");
                    }
                    self.download_manifest_attempt(manifest_id, target_dir, filter, cancel)
                        .await
                }
            })
            .await
            .into_result(|| DedupError::Cancelled)?;
        info!(
            files = result.statistics.files_downloaded,
            bytes = result.statistics.bytes_downloaded,
            "download complete"
        );
        Ok(result)
    }

    async fn download_manifest_attempt(
        &self,
        manifest_id: DedupId,
        target_dir: &Path,
        filter: Arc<ItemFilter>,
        cancel: &CancellationToken,
    ) -> DedupResult<DownloadResult> {
        let manifest = self.fetch_manifest(manifest_id, cancel).await?;
        let selected: Vec<(DedupId, PathBuf)> = manifest
            .items()
            .iter()
            .filter(|item| filter(&item.path))
            .map(|item| (item.blob, target_dir.join(item.path.trim_start_matches('/'))))
            .collect();
        debug!(
            selected = selected.len(),
            total = manifest.len(),
            "manifest items selected"
        );

        let metrics = Arc::new(SessionMetrics::new());
        let client = self.client.clone();
        let token = cancel.clone();
        let file_metrics = Arc::clone(&metrics);
        let files = run_bounded(
            selected,
            self.config.download_options(),
            move |(id, path): (DedupId, PathBuf)| {
                let client = client.clone();
                let token = token.clone();
                let metrics = Arc::clone(&file_metrics);
                async move {
                    write_file(&client, id, &path, &metrics, &token).await?;
                    Ok::<_, DedupError>(path)
                }
            },
            cancel,
        )
        .await?;

        Ok(DownloadResult {
            manifest,
            files,
            statistics: metrics.download_snapshot(),
        })
    }
}

async fn fetch_verified_chunk(
    client: &StoreClient,
    id: DedupId,
    cancel: &CancellationToken,
) -> DedupResult<Bytes> {
    let blob = client.get(id, cancel).await?;
    let data = decode_blob(&blob)?;
    let actual = DedupId::for_chunk(id.algorithm(), &data);
    if actual != id {
        return Err(DedupError::ContentMismatch {
            expected: id,
            actual,
        });
    }
    Ok(Bytes::from(data))
}

/// Expand `root` into its chunk list, fetching and verifying node blobs
async fn resolve_chunks(
    client: &StoreClient,
    root: DedupId,
    metrics: &SessionMetrics,
    cancel: &CancellationToken,
) -> DedupResult<Vec<ChildRef>> {
    if root.kind() == NodeKind::Chunk {
        return Err(DedupError::MalformedNode {
            id: root,
            reason: "content roots must be nodes".to_string(),
        });
    }
    let mut chunks = Vec::new();
    let mut stack = vec![ChildRef { id: root, size: 0 }];
    while let Some(next) = stack.pop() {
        if next.id.kind() == NodeKind::Chunk {
            chunks.push(next);
            continue;
        }
        let blob = client.get(next.id, cancel).await?;
        metrics.record_node_downloaded();
        let children = decode_children(next.id, &decode_blob(&blob)?)?;
        stack.extend(children.into_iter().rev());
    }
    Ok(chunks)
}

async fn read_content(
    client: &StoreClient,
    root: DedupId,
    metrics: &SessionMetrics,
    cancel: &CancellationToken,
) -> DedupResult<Vec<u8>> {
    let chunks = resolve_chunks(client, root, metrics, cancel).await?;
    let mut out = Vec::with_capacity(chunks.iter().map(|c| c.size as usize).sum());
    let mut fetched = stream::iter(chunks)
        .map(|c| fetch_verified_chunk(client, c.id, cancel))
        .buffered(CHUNKS_IN_FLIGHT_PER_FILE);
    while let Some(data) = fetched.next().await {
        let data = data?;
        metrics.record_chunk_downloaded(data.len() as u64);
        out.extend_from_slice(&data);
    }
    Ok(out)
}

async fn write_file(
    client: &StoreClient,
    root: DedupId,
    target: &Path,
    metrics: &SessionMetrics,
    cancel: &CancellationToken,
) -> DedupResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{file_name}.{}.partial", Uuid::new_v4().simple()));

    let result = write_chunks(client, root, &temp, metrics, cancel).await;
    match result {
        Ok(()) => {
            tokio::fs::rename(&temp, target).await?;
            metrics.record_file_downloaded();
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

async fn write_chunks(
    client: &StoreClient,
    root: DedupId,
    temp: &Path,
    metrics: &SessionMetrics,
    cancel: &CancellationToken,
) -> DedupResult<()> {
    let chunks = resolve_chunks(client, root, metrics, cancel).await?;
    let mut file = tokio::fs::File::create(temp).await?;
    let mut fetched = stream::iter(chunks)
        .map(|c| fetch_verified_chunk(client, c.id, cancel))
        .buffered(CHUNKS_IN_FLIGHT_PER_FILE);
    while let Some(data) = fetched.next().await {
        let data = data?;
        file.write_all(&data).await?;
        metrics.record_chunk_downloaded(data.len() as u64);
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
