//! Merkle-style node tree over content-defined chunks.
//!
//! A file becomes a tree whose leaves are its chunks, in order. Leaves are paged
//! into interior nodes of at most [`MAX_DIRECT_CHILDREN_PER_NODE`] children and the
//! pages are reduced again until one root remains. A file with a single chunk is
//! wrapped in one interior node, so every file root is an interior node.
//!
//! A node's stored blob is its encoded child list, one fixed-width record per
//! child: `[type tag: u8][hash: 32 bytes][transitive size: u64 LE]`. The node's
//! identifier is the hash of that blob.

use crate::chunker::ChunkInfo;
use crate::error::{DedupError, DedupResult};
use crate::hash::{DedupId, HashAlgorithm, NodeKind};

/// Maximum number of direct children of one interior node
pub const MAX_DIRECT_CHILDREN_PER_NODE: usize = 512;

/// Encoded size of one child record
pub const CHILD_RECORD_LEN: usize = 1 + 32 + 8;

/// A chunk leaf or an interior node, with its subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupNode {
    id: DedupId,
    transitive_content_bytes: u64,
    children: Vec<DedupNode>,
}

/// A decoded child record of a node blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    /// Identifier of the child
    pub id: DedupId,
    /// Content bytes under the child
    pub size: u64,
}

impl DedupNode {
    /// Leaf for one chunk
    pub fn chunk_leaf(id: DedupId, length: u64) -> Self {
        Self {
            id,
            transitive_content_bytes: length,
            children: Vec::new(),
        }
    }

    /// Interior node over `children`, in order
    pub fn interior(algorithm: HashAlgorithm, children: Vec<DedupNode>) -> Self {
        let encoded = encode_children(children.iter().map(|c| ChildRef {
            id: c.id,
            size: c.transitive_content_bytes,
        }));
        Self {
            id: DedupId::for_node(algorithm, &encoded),
            transitive_content_bytes: children.iter().map(|c| c.transitive_content_bytes).sum(),
            children,
        }
    }

    /// Build a file root from its chunks, in file order
    pub fn from_chunks(algorithm: HashAlgorithm, chunks: &[ChunkInfo]) -> DedupResult<Self> {
        let leaves = chunks
            .iter()
            .map(|c| Self::chunk_leaf(c.id, c.length))
            .collect();
        Self::from_children(algorithm, leaves)
    }

    /// Reduce `nodes` into a single root.
    ///
    /// Used both for file roots and for the batch root covering a set of files.
    pub fn from_children(algorithm: HashAlgorithm, nodes: Vec<DedupNode>) -> DedupResult<Self> {
        let mut level = nodes;
        if level.is_empty() {
            return Err(DedupError::EmptyBatch);
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(MAX_DIRECT_CHILDREN_PER_NODE));
            let mut rest = level.into_iter().peekable();
            while rest.peek().is_some() {
                let page: Vec<DedupNode> = rest.by_ref().take(MAX_DIRECT_CHILDREN_PER_NODE).collect();
                next.push(Self::interior(algorithm, page));
            }
            level = next;
        }
        let Some(root) = level.pop() else {
            return Err(DedupError::EmptyBatch);
        };
        if root.is_chunk() {
            Ok(Self::interior(algorithm, vec![root]))
        } else {
            Ok(root)
        }
    }

    /// Identifier of this node
    pub fn id(&self) -> DedupId {
        self.id
    }

    /// Content bytes under this node
    pub fn transitive_content_bytes(&self) -> u64 {
        self.transitive_content_bytes
    }

    /// Direct children, empty for a chunk leaf
    pub fn children(&self) -> &[DedupNode] {
        &self.children
    }

    /// True for a chunk leaf
    pub fn is_chunk(&self) -> bool {
        self.id.kind() == NodeKind::Chunk
    }

    /// Number of interior levels above the leaves
    pub fn height(&self) -> usize {
        self.children.iter().map(|c| c.height() + 1).max().unwrap_or(0)
    }

    /// The stored blob for an interior node
    pub fn encode(&self) -> Vec<u8> {
        encode_children(self.children.iter().map(|c| ChildRef {
            id: c.id,
            size: c.transitive_content_bytes,
        }))
    }

    /// Chunk leaves, in content order
    pub fn leaves(&self) -> Vec<&DedupNode> {
        let mut out = Vec::new();
        self.collect(&mut |n| {
            if n.is_chunk() {
                out.push(n);
            }
        });
        out
    }

    /// Interior nodes, children before parents
    pub fn interior_nodes_bottom_up(&self) -> Vec<&DedupNode> {
        let mut out = Vec::new();
        self.collect(&mut |n| {
            if !n.is_chunk() {
                out.push(n);
            }
        });
        out
    }

    fn collect<'a>(&'a self, visit: &mut impl FnMut(&'a DedupNode)) {
        for child in &self.children {
            child.collect(visit);
        }
        visit(self);
    }
}

fn encode_children(children: impl Iterator<Item = ChildRef>) -> Vec<u8> {
    let mut out = Vec::new();
    for child in children {
        out.push(child.id.type_tag());
        out.extend_from_slice(child.id.hash());
        out.extend_from_slice(&child.size.to_le_bytes());
    }
    out
}

/// Parse a node blob back into its child records, verifying it hashes to `id`
pub fn decode_children(id: DedupId, blob: &[u8]) -> DedupResult<Vec<ChildRef>> {
    let malformed = |reason: String| DedupError::MalformedNode { id, reason };
    if id.kind() != NodeKind::Node {
        return Err(malformed("identifier names a chunk, not a node".to_string()));
    }
    if blob.is_empty() || blob.len() % CHILD_RECORD_LEN != 0 {
        return Err(malformed(format!("blob length {} is not a whole number of records", blob.len())));
    }
    let actual = DedupId::for_node(id.algorithm(), blob);
    if actual != id {
        return Err(DedupError::ContentMismatch {
            expected: id,
            actual,
        });
    }
    blob.chunks_exact(CHILD_RECORD_LEN)
        .map(|record| {
            let (algorithm, kind) = DedupId::parts_from_tag(record[0])
                .ok_or_else(|| malformed(format!("unknown child tag {:#04x}", record[0])))?;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&record[1..33]);
            let mut size = [0u8; 8];
            size.copy_from_slice(&record[33..41]);
            Ok(ChildRef {
                id: DedupId::new(algorithm, kind, hash),
                size: u64::from_le_bytes(size),
            })
        })
        .collect()
}
