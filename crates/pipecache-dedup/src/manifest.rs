//! Artifact manifest: logical item path to content root.

use serde::{Deserialize, Serialize};

use crate::error::{DedupError, DedupResult};
use crate::hash::DedupId;

/// One file in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    /// Logical path, `/`-separated and rooted, e.g. `/bin/tool`
    pub path: String,
    /// Root node of the item's content
    pub blob: DedupId,
    /// Content length in bytes
    pub size: u64,
}

/// Immutable listing of the items published together, ordered by logical path
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    items: Vec<ManifestItem>,
}

impl Manifest {
    /// Build a manifest, normalizing paths and sorting items.
    ///
    /// Fails on an unusable path or when two items share a path.
    pub fn new(items: Vec<ManifestItem>) -> DedupResult<Self> {
        let mut items = items
            .into_iter()
            .map(|item| {
                Ok(ManifestItem {
                    path: normalize_item_path(&item.path)?,
                    ..item
                })
            })
            .collect::<DedupResult<Vec<_>>>()?;
        items.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(pair) = items.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(DedupError::DuplicateItemPath(pair[0].path.clone()));
        }
        Ok(Self { items })
    }

    /// Items in logical path order
    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }

    /// Look up an item by logical path
    pub fn get(&self, path: &str) -> Option<&ManifestItem> {
        let path = normalize_item_path(path).ok()?;
        self.items
            .binary_search_by(|item| item.path.as_str().cmp(&path))
            .ok()
            .map(|i| &self.items[i])
    }

    /// Total content bytes across items
    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the manifest lists no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serialize to the stored JSON form
    pub fn to_json(&self) -> DedupResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the stored JSON form, re-checking the item invariants
    pub fn from_json(data: &[u8]) -> DedupResult<Self> {
        let parsed: Manifest = serde_json::from_slice(data)?;
        Self::new(parsed.items)
    }
}

/// Normalize a logical item path to `/a/b` form.
///
/// Accepts `\` as a separator, drops `.` and empty components, and rejects
/// `..` components and paths that name nothing.
pub fn normalize_item_path(path: &str) -> DedupResult<String> {
    let invalid = |reason: &str| DedupError::InvalidItemPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.contains('\0') {
        return Err(invalid("contains NUL"));
    }
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(invalid("contains `..`")),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(invalid("empty"));
    }
    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    fn item(path: &str, n: u8) -> ManifestItem {
        ManifestItem {
            path: path.to_string(),
            blob: DedupId::for_node(HashAlgorithm::Sha256, &[n]),
            size: n as u64,
        }
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_item_path("a/b").unwrap(), "/a/b");
        assert_eq!(normalize_item_path("\\a\\.\\b//c").unwrap(), "/a/b/c");
        assert!(normalize_item_path("a/../b").is_err());
        assert!(normalize_item_path("/").is_err());
        assert!(normalize_item_path("").is_err());
    }

    #[test]
    fn items_are_sorted() {
        let m = Manifest::new(vec![item("z", 1), item("/a/b", 2), item("a", 3)]).unwrap();
        let paths: Vec<_> = m.items().iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/a/b", "/z"]);
        assert_eq!(m.total_size(), 6);
        assert_eq!(m.get("a/b").unwrap().size, 2);
        assert!(m.get("/missing").is_none());
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = Manifest::new(vec![item("/a", 1), item("a", 2)]).unwrap_err();
        assert!(matches!(err, DedupError::DuplicateItemPath(p) if p == "/a"));
    }

    #[test]
    fn json_form() {
        let m = Manifest::new(vec![item("/x", 1)]).unwrap();
        let json = String::from_utf8(m.to_json().unwrap()).unwrap();
        assert!(json.contains("\"path\":\"/x\""));
        assert!(json.contains("\"blob\":\""));
        assert_eq!(Manifest::from_json(json.as_bytes()).unwrap(), m);
        assert!(Manifest::from_json(br#"{"items":[{"path":"../x","blob":"00","size":1}]}"#).is_err());
    }
}
