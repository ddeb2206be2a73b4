//! LZ4 and Zstd compression for stored chunk blobs.
//!
//! Every blob written to a content store starts with a one-byte codec tag
//! (`0` raw, `1` LZ4, `2` Zstd) so a reader never needs to know the writer's
//! configuration. Node blobs are always stored raw.

use serde::{Deserialize, Serialize};

use crate::error::{DedupError, DedupResult};

const TAG_NONE: u8 = 0;
const TAG_LZ4: u8 = 1;
const TAG_ZSTD: u8 = 2;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression (passthrough)
    None,
    /// LZ4 frame format, cheap enough for every chunk
    #[default]
    Lz4,
    /// Zstandard, higher ratio at more CPU
    Zstd {
        /// Compression level (1=fastest, 19=best ratio, 3=balanced default)
        level: i32,
    },
}

impl CompressionAlgorithm {
    fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => TAG_NONE,
            CompressionAlgorithm::Lz4 => TAG_LZ4,
            CompressionAlgorithm::Zstd { .. } => TAG_ZSTD,
        }
    }
}

/// Compress data with the given algorithm. Returns compressed bytes.
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> DedupResult<Vec<u8>> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionAlgorithm::Zstd { level } => {
            zstd::encode_all(data, level).map_err(|e| DedupError::CompressionFailed(e.to_string()))
        }
    }
}

/// Decompress data using the algorithm that was used for compression.
pub fn decompress(data: &[u8], algo: CompressionAlgorithm) -> DedupResult<Vec<u8>> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| DedupError::DecompressionFailed(e.to_string())),
        CompressionAlgorithm::Zstd { .. } => {
            zstd::decode_all(data).map_err(|e| DedupError::DecompressionFailed(e.to_string()))
        }
    }
}

/// Check whether compressing data is worthwhile.
/// Returns false if data appears to be already compressed or random (high entropy).
pub fn is_compressible(data: &[u8]) -> bool {
    if data.len() < 64 {
        return false;
    }
    let sample = &data[..data.len().min(1024)];
    let compressed = lz4_flex::compress_prepend_size(sample);
    (compressed.len() as f64) < (sample.len() as f64 * 0.95)
}

/// Encode a blob for storage: codec tag followed by the (possibly compressed) payload.
///
/// Falls back to raw storage when the data does not look compressible or when
/// compression would not shrink it.
pub fn encode_blob(data: &[u8], algo: CompressionAlgorithm) -> DedupResult<Vec<u8>> {
    if algo != CompressionAlgorithm::None && is_compressible(data) {
        let compressed = compress(data, algo)?;
        if compressed.len() < data.len() {
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(algo.tag());
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }
    let mut out = Vec::with_capacity(data.len() + 1);
    out.push(TAG_NONE);
    out.extend_from_slice(data);
    Ok(out)
}

/// Decode a blob written by [`encode_blob`]
pub fn decode_blob(blob: &[u8]) -> DedupResult<Vec<u8>> {
    let Some((&tag, payload)) = blob.split_first() else {
        return Err(DedupError::DecompressionFailed("empty blob".to_string()));
    };
    match tag {
        TAG_NONE => decompress(payload, CompressionAlgorithm::None),
        TAG_LZ4 => decompress(payload, CompressionAlgorithm::Lz4),
        TAG_ZSTD => decompress(payload, CompressionAlgorithm::Zstd { level: 0 }),
        other => Err(DedupError::UnknownCodec(other)),
    }
}
