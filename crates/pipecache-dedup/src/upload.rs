//! Deduplicating upload session.
//!
//! Upload path: files → chunk + hash (bounded, blocking threads) → node trees →
//! batch root → existence check → transfer missing chunks → transfer missing
//! nodes, bottom-up. Every identifier the published tree references, present or
//! new, receives the same keep-until reference, computed before any transfer.
//! Present blobs have it extended; new blobs are stored with it in the same `put`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use pipecache_exec::{run_bounded, RetryExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chunker::{ChunkInfo, Chunker};
use crate::compression::{encode_blob, CompressionAlgorithm};
use crate::config::SessionConfig;
use crate::error::{DedupError, DedupResult};
use crate::hash::{DedupId, HashType};
use crate::manifest::{Manifest, ManifestItem};
use crate::node::DedupNode;
use crate::retention::KeepUntil;
use crate::session::StoreClient;
use crate::stats::{SessionMetrics, UploadStatistics};

/// Where to re-read a chunk's bytes at transfer time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSource {
    /// A byte range of a file on disk
    File {
        /// Source file
        path: PathBuf,
        /// Byte offset of the chunk
        offset: u64,
        /// Chunk length
        length: u64,
    },
    /// Bytes held in memory
    Memory(Bytes),
}

impl ChunkSource {
    /// Read the chunk and check it still hashes to `id`
    pub fn read_verified(&self, id: DedupId) -> DedupResult<Bytes> {
        let data = match self {
            ChunkSource::Memory(data) => data.clone(),
            ChunkSource::File {
                path,
                offset,
                length,
            } => read_range(path, *offset, *length).map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    DedupError::FileChanged {
                        path: path.clone(),
                        id,
                    }
                } else {
                    DedupError::Io(e)
                }
            })?,
        };
        if DedupId::for_chunk(id.algorithm(), &data) != id {
            return Err(match self {
                ChunkSource::File { path, .. } => DedupError::FileChanged {
                    path: path.clone(),
                    id,
                },
                ChunkSource::Memory(_) => DedupError::ContentMismatch {
                    expected: id,
                    actual: DedupId::for_chunk(id.algorithm(), &data),
                },
            });
        }
        Ok(data)
    }
}

fn read_range(path: &Path, offset: u64, length: u64) -> std::io::Result<Bytes> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)?;
    Ok(Bytes::from(buf))
}

/// Chunk id to the source its bytes are read from
pub type ChunkSources = HashMap<DedupId, ChunkSource>;

/// A file that was chunked and hashed
#[derive(Debug, Clone)]
pub struct HashedFile {
    /// Source file
    pub path: PathBuf,
    /// Root node of the file's content
    pub root: DedupNode,
    /// Chunks in file order
    pub chunks: Vec<ChunkInfo>,
}

impl HashedFile {
    /// Content length
    pub fn size(&self) -> u64 {
        self.root.transitive_content_bytes()
    }
}

/// A file that could not be hashed; it is left out of the upload
#[derive(Debug)]
pub struct FailedFile {
    /// Source file
    pub path: PathBuf,
    /// Why it failed
    pub error: DedupError,
}

/// Outcome of hashing a set of files
#[derive(Debug, Default)]
pub struct HashedBatch {
    /// Files hashed successfully, in input order
    pub files: Vec<HashedFile>,
    /// Files that failed, in input order
    pub failed: Vec<FailedFile>,
}

impl HashedBatch {
    /// Chunk sources for every hashed file
    pub fn sources(&self) -> ChunkSources {
        let mut sources = ChunkSources::new();
        for file in &self.files {
            for chunk in &file.chunks {
                sources.entry(chunk.id).or_insert_with(|| ChunkSource::File {
                    path: file.path.clone(),
                    offset: chunk.offset,
                    length: chunk.length,
                });
            }
        }
        sources
    }
}

/// A file to publish under a logical path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishItem {
    /// Path inside the artifact, e.g. `/bin/tool`
    pub logical_path: String,
    /// File on disk
    pub path: PathBuf,
}

/// Outcome of [`UploadSession::publish`]
#[derive(Debug)]
pub struct PublishResult {
    /// Items that were published
    pub manifest: Manifest,
    /// Identifier of the stored manifest
    pub manifest_id: DedupId,
    /// Transfer counters
    pub statistics: UploadStatistics,
    /// Files that could not be hashed and are missing from the manifest
    pub failed: Vec<FailedFile>,
}

/// One upload session over a content store
pub struct UploadSession {
    id: Uuid,
    client: StoreClient,
    config: SessionConfig,
    hash_type: HashType,
    chunker: Chunker,
}

impl UploadSession {
    pub(crate) fn new(client: StoreClient, config: SessionConfig, hash_type: HashType) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            config,
            hash_type,
            chunker: Chunker::new(hash_type),
        }
    }

    /// Session identifier, used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hash type this session chunks and hashes with
    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// Chunk and hash files with bounded parallelism.
    ///
    /// A file that fails to read is reported in [`HashedBatch::failed`] and does
    /// not stop the rest. Cancellation stops the whole batch.
    #[instrument(skip(self, paths, cancel), fields(session = %self.id, files = paths.len()))]
    pub async fn hash_files(
        &self,
        paths: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> DedupResult<HashedBatch> {
        let (hashed, failed) = self
            .hash_tagged(paths.into_iter().map(|p| (p, ())).collect(), cancel)
            .await?;
        Ok(HashedBatch {
            files: hashed.into_iter().map(|(file, ())| file).collect(),
            failed,
        })
    }

    /// Hash `(path, tag)` pairs, keeping each tag with its outcome
    async fn hash_tagged<K: Send + 'static>(
        &self,
        items: Vec<(PathBuf, K)>,
        cancel: &CancellationToken,
    ) -> DedupResult<(Vec<(HashedFile, K)>, Vec<FailedFile>)> {
        let chunker = self.chunker.clone();
        let token = cancel.clone();
        let outcomes = run_bounded(
            items,
            self.config.hashing_options(),
            move |(path, tag): (PathBuf, K)| {
                let chunker = chunker.clone();
                let token = token.clone();
                async move {
                    let source = path.clone();
                    let hashed =
                        tokio::task::spawn_blocking(move || chunker.chunk_file(&source, &token))
                            .await?;
                    match hashed {
                        Ok((root, chunks)) => {
                            Ok::<_, DedupError>(Ok((HashedFile { path, root, chunks }, tag)))
                        }
                        Err(e) if e.is_cancelled() => Err(e),
                        Err(error) => {
                            warn!(path = %path.display(), %error, "failed to hash file");
                            Ok(Err(FailedFile { path, error }))
                        }
                    }
                }
            },
            cancel,
        )
        .await?;

        let mut hashed = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(file) => hashed.push(file),
                Err(file) => failed.push(file),
            }
        }
        debug!(hashed = hashed.len(), failed = failed.len(), "hashed files");
        Ok((hashed, failed))
    }

    /// Chunk an in-memory buffer into a root node plus its sources
    pub fn hash_bytes(&self, data: &[u8]) -> DedupResult<(DedupNode, ChunkSources)> {
        let chunks = self.chunker.chunk(data);
        let infos: Vec<ChunkInfo> = chunks.iter().map(|c| c.info()).collect();
        let root = DedupNode::from_chunks(self.chunker.algorithm(), &infos)?;
        let sources = chunks
            .into_iter()
            .map(|c| (c.id, ChunkSource::Memory(c.data)))
            .collect();
        Ok((root, sources))
    }

    /// Root node covering several file roots
    pub fn batch_root(&self, roots: Vec<DedupNode>) -> DedupResult<DedupNode> {
        DedupNode::from_children(self.hash_type.algorithm(), roots)
    }

    /// Transfer every chunk and node under `root` the store does not already hold.
    ///
    /// The whole transfer is retried per the session's retry policy.
    #[instrument(skip(self, root, sources, cancel), fields(session = %self.id, root = %root.id()))]
    pub async fn upload(
        &self,
        root: &DedupNode,
        sources: ChunkSources,
        cancel: &CancellationToken,
    ) -> DedupResult<UploadStatistics> {
        let keep_until = KeepUntil::from_now(self.config.keep_until);
        let plan = Arc::new(UploadPlan::new(root, sources));
        let executor = RetryExecutor::new(self.config.retry.clone());
        let statistics = executor
            .execute(cancel, |attempt| {
                let plan = Arc::clone(&plan);
                async move {
                    if attempt > 1 {
                        debug!(attempt, "retrying upload");
                    }
                    self.upload_attempt(plan, keep_until, cancel).await
                }
            })
            .await
            .into_result(|| DedupError::Cancelled)?;
        info!(
            chunks_uploaded = statistics.chunks_uploaded,
            chunks_present = statistics.chunks_present,
            nodes_uploaded = statistics.nodes_uploaded,
            bytes_uploaded = statistics.bytes_uploaded,
            bytes_saved_by_dedup = statistics.bytes_saved_by_dedup,
            "upload complete"
        );
        Ok(statistics)
    }

    async fn upload_attempt(
        &self,
        plan: Arc<UploadPlan>,
        keep_until: KeepUntil,
        cancel: &CancellationToken,
    ) -> DedupResult<UploadStatistics> {
        let metrics = Arc::new(SessionMetrics::new());
        metrics.record_duplicate(plan.duplicate_bytes);

        let client = self.client.clone();
        let token = cancel.clone();
        let checks = run_bounded(
            plan.chunks.clone(),
            self.config.upload_options(),
            move |(id, length): (DedupId, u64)| {
                let client = client.clone();
                let token = token.clone();
                async move {
                    let present = client.retain_existing(id, keep_until, &token).await?;
                    Ok::<_, DedupError>((id, length, present))
                }
            },
            cancel,
        )
        .await?;

        let mut missing = Vec::new();
        for (id, length, present) in checks {
            if present {
                metrics.record_chunk_present(length);
            } else {
                missing.push(id);
            }
        }
        debug!(missing = missing.len(), total = plan.chunks.len(), "chunk existence checked");

        let client = self.client.clone();
        let token = cancel.clone();
        let compression = self.config.compression;
        let chunk_metrics = Arc::clone(&metrics);
        let chunk_plan = Arc::clone(&plan);
        run_bounded(
            missing,
            self.config.upload_options(),
            move |id: DedupId| {
                let client = client.clone();
                let token = token.clone();
                let metrics = Arc::clone(&chunk_metrics);
                let plan = Arc::clone(&chunk_plan);
                async move {
                    let source = plan
                        .sources
                        .get(&id)
                        .cloned()
                        .ok_or(DedupError::MissingSource(id))?;
                    let (content_len, blob) = tokio::task::spawn_blocking(move || {
                        encode_chunk(&source, id, compression)
                    })
                    .await??;
                    let stored = blob.len() as u64 - 1;
                    client.put(id, blob, keep_until, &token).await?;
                    metrics.record_chunk_uploaded(content_len, stored);
                    Ok::<_, DedupError>(())
                }
            },
            cancel,
        )
        .await?;

        for level in &plan.node_levels {
            let client = self.client.clone();
            let token = cancel.clone();
            let node_metrics = Arc::clone(&metrics);
            run_bounded(
                level.clone(),
                self.config.upload_options(),
                move |(id, blob): (DedupId, Bytes)| {
                    let client = client.clone();
                    let token = token.clone();
                    let metrics = Arc::clone(&node_metrics);
                    async move {
                        if !client.retain_existing(id, keep_until, &token).await? {
                            client.put(id, blob, keep_until, &token).await?;
                            metrics.record_node_uploaded();
                        }
                        Ok::<_, DedupError>(())
                    }
                },
                cancel,
            )
            .await?;
        }

        Ok(metrics.upload_snapshot())
    }

    /// Hash files, build their manifest, and upload both.
    ///
    /// Files that fail to hash are left out of the manifest and reported in
    /// [`PublishResult::failed`].
    #[instrument(skip(self, items, cancel), fields(session = %self.id, items = items.len()))]
    pub async fn publish(
        &self,
        items: Vec<PublishItem>,
        cancel: &CancellationToken,
    ) -> DedupResult<PublishResult> {
        let (hashed, failed) = self
            .hash_tagged(
                items.into_iter().map(|i| (i.path, i.logical_path)).collect(),
                cancel,
            )
            .await?;

        let manifest = Manifest::new(
            hashed
                .iter()
                .map(|(file, logical_path)| ManifestItem {
                    path: logical_path.clone(),
                    blob: file.root.id(),
                    size: file.size(),
                })
                .collect(),
        )?;
        let batch = HashedBatch {
            files: hashed.into_iter().map(|(file, _)| file).collect(),
            failed,
        };
        let (manifest_root, manifest_sources) = self.hash_bytes(&manifest.to_json()?)?;
        let manifest_id = manifest_root.id();

        let mut sources = batch.sources();
        for (id, source) in manifest_sources {
            sources.entry(id).or_insert(source);
        }
        let mut roots: Vec<DedupNode> = batch.files.iter().map(|f| f.root.clone()).collect();
        roots.push(manifest_root);
        let root = self.batch_root(roots)?;

        let statistics = self.upload(&root, sources, cancel).await?;
        info!(
            manifest = %manifest_id,
            items = manifest.len(),
            failed = batch.failed.len(),
            "published manifest"
        );
        Ok(PublishResult {
            manifest,
            manifest_id,
            statistics,
            failed: batch.failed,
        })
    }
}

fn encode_chunk(
    source: &ChunkSource,
    id: DedupId,
    compression: CompressionAlgorithm,
) -> DedupResult<(u64, Bytes)> {
    let data = source.read_verified(id)?;
    let blob = encode_blob(&data, compression)?;
    Ok((data.len() as u64, Bytes::from(blob)))
}

/// Unique transfer work derived from one tree, computed once per upload
struct UploadPlan {
    chunks: Vec<(DedupId, u64)>,
    node_levels: Vec<Vec<(DedupId, Bytes)>>,
    sources: ChunkSources,
    duplicate_bytes: u64,
}

impl UploadPlan {
    fn new(root: &DedupNode, sources: ChunkSources) -> Self {
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();
        let mut duplicate_bytes = 0;
        for leaf in root.leaves() {
            if seen.insert(leaf.id()) {
                chunks.push((leaf.id(), leaf.transitive_content_bytes()));
            } else {
                duplicate_bytes += leaf.transitive_content_bytes();
            }
        }

        let mut by_height: BTreeMap<usize, Vec<(DedupId, Bytes)>> = BTreeMap::new();
        for node in root.interior_nodes_bottom_up() {
            if seen.insert(node.id()) {
                let blob = encode_node_blob(node);
                by_height.entry(node.height()).or_default().push((node.id(), blob));
            }
        }

        Self {
            chunks,
            node_levels: by_height.into_values().collect(),
            sources,
            duplicate_bytes,
        }
    }
}

fn encode_node_blob(node: &DedupNode) -> Bytes {
    let encoded = node.encode();
    let mut blob = Vec::with_capacity(encoded.len() + 1);
    blob.push(0);
    blob.extend_from_slice(&encoded);
    Bytes::from(blob)
}
