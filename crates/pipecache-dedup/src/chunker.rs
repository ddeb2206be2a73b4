//! Content-defined chunking (FastCDC)

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use fastcdc::v2020::{FastCDC, StreamCDC};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{DedupError, DedupResult};
use crate::hash::{DedupId, HashAlgorithm, HashType};
use crate::node::DedupNode;

/// A content-defined chunk produced by the FastCDC chunker
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk content
    pub data: Bytes,
    /// Identifier of the chunk content
    pub id: DedupId,
    /// Byte offset of this chunk in the original data stream
    pub offset: u64,
}

impl Chunk {
    /// Position and identity of this chunk, without its bytes
    pub fn info(&self) -> ChunkInfo {
        ChunkInfo {
            id: self.id,
            offset: self.offset,
            length: self.data.len() as u64,
        }
    }
}

/// Where a chunk lives in its source, used to re-read it at upload time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Identifier of the chunk content
    pub id: DedupId,
    /// Byte offset in the source
    pub offset: u64,
    /// Chunk length in bytes
    pub length: u64,
}

/// Configuration for the FastCDC chunker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes
    pub min_size: usize,
    /// Average (target) chunk size in bytes
    pub avg_size: usize,
    /// Maximum chunk size in bytes
    pub max_size: usize,
    /// Minimum read buffer wrapped around streamed sources
    pub read_buffer_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 32 * 1024,
            avg_size: 64 * 1024,
            max_size: 128 * 1024,
            read_buffer_size: 1024 * 1024,
        }
    }
}

impl ChunkerConfig {
    /// Check the sizes against the limits of the 2020 FastCDC gear hash.
    pub fn validate(&self) -> DedupResult<()> {
        let check = |name: &str, value: usize, lo: u32, hi: u32| {
            if value < lo as usize || value > hi as usize {
                Err(DedupError::InvalidChunkerConfig(format!(
                    "{name} {value} outside {lo}..={hi}"
                )))
            } else {
                Ok(())
            }
        };
        check(
            "min_size",
            self.min_size,
            fastcdc::v2020::MINIMUM_MIN,
            fastcdc::v2020::MINIMUM_MAX,
        )?;
        check(
            "avg_size",
            self.avg_size,
            fastcdc::v2020::AVERAGE_MIN,
            fastcdc::v2020::AVERAGE_MAX,
        )?;
        check(
            "max_size",
            self.max_size,
            fastcdc::v2020::MAXIMUM_MIN,
            fastcdc::v2020::MAXIMUM_MAX,
        )?;
        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(DedupError::InvalidChunkerConfig(format!(
                "sizes must satisfy min <= avg <= max, got {}/{}/{}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(DedupError::InvalidChunkerConfig(
                "read_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Content-defined chunker using the FastCDC algorithm.
///
/// Chunk boundaries depend only on content, so an insertion near the start of a
/// file shifts at most a couple of chunks. Empty input yields one empty chunk.
#[derive(Debug, Clone)]
pub struct Chunker {
    algorithm: HashAlgorithm,
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(HashType::default())
    }
}

impl Chunker {
    /// Create a chunker with the sizes and hash of `hash_type`
    pub fn new(hash_type: HashType) -> Self {
        Self {
            algorithm: hash_type.algorithm(),
            config: hash_type.chunker_config(),
        }
    }

    /// Create a chunker with custom sizes
    pub fn with_config(algorithm: HashAlgorithm, config: ChunkerConfig) -> DedupResult<Self> {
        config.validate()?;
        Ok(Self { algorithm, config })
    }

    /// Hash algorithm used for chunk identifiers
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Active chunk sizes
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk an in-memory buffer.
    /// Concatenating all chunk.data bytes reconstructs the original data.
    pub fn chunk(&self, data: &[u8]) -> Vec<Chunk> {
        if data.is_empty() {
            return vec![self.empty_chunk()];
        }
        FastCDC::new(
            data,
            self.config.min_size as u32,
            self.config.avg_size as u32,
            self.config.max_size as u32,
        )
        .map(|c| {
            let start = c.offset;
            let end = start + c.length;
            let chunk_bytes = Bytes::copy_from_slice(&data[start..end]);
            Chunk {
                id: DedupId::for_chunk(self.algorithm, &chunk_bytes),
                data: chunk_bytes,
                offset: start as u64,
            }
        })
        .collect()
    }

    /// Chunk a byte stream without holding it in memory.
    ///
    /// Produces the same boundaries as [`Chunker::chunk`] over the same bytes.
    pub fn chunk_reader<R: Read>(&self, reader: R) -> ChunkStream<R> {
        let reader = BufReader::with_capacity(self.config.read_buffer_size, reader);
        ChunkStream {
            inner: StreamCDC::new(
                reader,
                self.config.min_size as u32,
                self.config.avg_size as u32,
                self.config.max_size as u32,
            ),
            algorithm: self.algorithm,
            emitted: false,
            done: false,
        }
    }

    /// Chunk a file and build its node tree.
    ///
    /// Blocking; run it on a blocking thread. Checks `cancel` between chunks.
    pub fn chunk_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> DedupResult<(DedupNode, Vec<ChunkInfo>)> {
        let file = File::open(path)?;
        let mut chunks = Vec::new();
        for chunk in self.chunk_reader(file) {
            if cancel.is_cancelled() {
                return Err(DedupError::Cancelled);
            }
            chunks.push(chunk?.info());
        }
        trace!(path = %path.display(), chunks = chunks.len(), "chunked file");
        let root = DedupNode::from_chunks(self.algorithm, &chunks)?;
        Ok((root, chunks))
    }

    fn empty_chunk(&self) -> Chunk {
        Chunk {
            data: Bytes::new(),
            id: DedupId::for_chunk(self.algorithm, &[]),
            offset: 0,
        }
    }
}

/// Iterator over the chunks of a stream, see [`Chunker::chunk_reader`]
pub struct ChunkStream<R: Read> {
    inner: StreamCDC<BufReader<R>>,
    algorithm: HashAlgorithm,
    emitted: bool,
    done: bool,
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = DedupResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(data)) => {
                self.emitted = true;
                let id = DedupId::for_chunk(self.algorithm, &data.data);
                Some(Ok(Chunk {
                    data: Bytes::from(data.data),
                    id,
                    offset: data.offset,
                }))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(match e {
                    fastcdc::v2020::Error::IoError(io) => DedupError::Io(io),
                    other => DedupError::Chunking(other.to_string()),
                }))
            }
            None => {
                self.done = true;
                if self.emitted {
                    None
                } else {
                    Some(Ok(Chunk {
                        data: Bytes::new(),
                        id: DedupId::for_chunk(self.algorithm, &[]),
                        offset: 0,
                    }))
                }
            }
        }
    }
}
