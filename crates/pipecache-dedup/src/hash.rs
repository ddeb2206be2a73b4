//! Content identifiers: hash algorithms, hash types and `DedupId`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::chunker::ChunkerConfig;
use crate::error::DedupError;

/// Strong 256-bit hash used to identify chunks and nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum HashAlgorithm {
    /// SHA-256
    #[default]
    Sha256,
    /// BLAKE3
    Blake3,
}

impl HashAlgorithm {
    /// Hash `data` into a 32-byte digest
    pub fn digest(&self, data: &[u8]) -> [u8; 32] {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).into(),
            HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }
}

/// The dedup hash type a session runs with: hash algorithm plus chunk size profile.
///
/// Resolved once when a session is built and passed down by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashType {
    /// SHA-256 ids, 64 KiB average chunks
    #[default]
    Dedup64K,
    /// SHA-256 ids, 1 MiB average chunks
    Dedup1024K,
    /// BLAKE3 ids, 64 KiB average chunks, 512 KiB maximum
    Blake3Cdc,
}

impl HashType {
    /// Hash algorithm used for chunk and node identifiers
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            HashType::Dedup64K | HashType::Dedup1024K => HashAlgorithm::Sha256,
            HashType::Blake3Cdc => HashAlgorithm::Blake3,
        }
    }

    /// Chunk size profile for the content-defined chunker
    pub fn chunker_config(&self) -> ChunkerConfig {
        match self {
            HashType::Dedup64K => ChunkerConfig::default(),
            HashType::Dedup1024K => ChunkerConfig {
                min_size: 512 * 1024,
                avg_size: 1024 * 1024,
                max_size: 2 * 1024 * 1024,
                ..ChunkerConfig::default()
            },
            HashType::Blake3Cdc => ChunkerConfig {
                max_size: 512 * 1024,
                ..ChunkerConfig::default()
            },
        }
    }

    /// Stable name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            HashType::Dedup64K => "Dedup64K",
            HashType::Dedup1024K => "Dedup1024K",
            HashType::Blake3Cdc => "Blake3Cdc",
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashType {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dedup64k" => Ok(HashType::Dedup64K),
            "dedup1024k" => Ok(HashType::Dedup1024K),
            "blake3cdc" => Ok(HashType::Blake3Cdc),
            _ => Err(DedupError::InvalidId(format!("unknown hash type {s}"))),
        }
    }
}

/// Whether an identifier names a single chunk or an interior node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// Leaf wrapping one content-defined chunk
    Chunk,
    /// Interior node over an ordered list of children
    Node,
}

/// Content identifier of a chunk or node.
///
/// Identical bytes always produce an identical `DedupId`, which is what makes
/// cross-file deduplication work. The text form is the lowercase hex digest
/// followed by a two-digit type tag: `01`/`02` for SHA-256 chunk/node and
/// `11`/`12` for BLAKE3 chunk/node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupId {
    algorithm: HashAlgorithm,
    kind: NodeKind,
    hash: [u8; 32],
}

impl DedupId {
    /// Build an identifier from its parts
    pub fn new(algorithm: HashAlgorithm, kind: NodeKind, hash: [u8; 32]) -> Self {
        Self {
            algorithm,
            kind,
            hash,
        }
    }

    /// Identifier of a chunk holding exactly `data`
    pub fn for_chunk(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        Self::new(algorithm, NodeKind::Chunk, algorithm.digest(data))
    }

    /// Identifier of a node whose encoded child list is `encoded`
    pub fn for_node(algorithm: HashAlgorithm, encoded: &[u8]) -> Self {
        Self::new(algorithm, NodeKind::Node, algorithm.digest(encoded))
    }

    /// Hash algorithm
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Chunk or node
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for chunk identifiers
    pub fn is_chunk(&self) -> bool {
        self.kind == NodeKind::Chunk
    }

    /// Raw digest
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// One-byte type tag (algorithm + kind)
    pub fn type_tag(&self) -> u8 {
        let base = match self.algorithm {
            HashAlgorithm::Sha256 => 0x00,
            HashAlgorithm::Blake3 => 0x10,
        };
        match self.kind {
            NodeKind::Chunk => base | 0x01,
            NodeKind::Node => base | 0x02,
        }
    }

    /// Decode a type tag produced by [`DedupId::type_tag`]
    pub fn parts_from_tag(tag: u8) -> Option<(HashAlgorithm, NodeKind)> {
        let algorithm = match tag & 0xf0 {
            0x00 => HashAlgorithm::Sha256,
            0x10 => HashAlgorithm::Blake3,
            _ => return None,
        };
        let kind = match tag & 0x0f {
            0x01 => NodeKind::Chunk,
            0x02 => NodeKind::Node,
            _ => return None,
        };
        Some((algorithm, kind))
    }

    /// Lowercase hex digest followed by the type tag
    pub fn to_hex(&self) -> String {
        format!("{}{:02x}", hex::encode(self.hash), self.type_tag())
    }
}

impl fmt::Display for DedupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DedupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DedupId({})", self.to_hex())
    }
}

impl FromStr for DedupId {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DedupError::InvalidId(s.to_string());
        if s.len() != 66 || !s.is_ascii() {
            return Err(invalid());
        }
        let mut hash = [0u8; 32];
        hex::decode_to_slice(&s[..64], &mut hash).map_err(|_| invalid())?;
        let tag = u8::from_str_radix(&s[64..], 16).map_err(|_| invalid())?;
        let (algorithm, kind) = Self::parts_from_tag(tag).ok_or_else(invalid)?;
        Ok(Self::new(algorithm, kind, hash))
    }
}

impl Serialize for DedupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DedupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
