//! Directory enumeration for resolved include patterns.
//!
//! Each include pattern is reduced to the deepest directory that precedes its first glob
//! character plus a walk depth. Walks may visit more than the pattern can match; the
//! [`GlobFilter`] discards the extras.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::error::{FingerprintError, FingerprintResult};
use crate::glob::{GlobDecision, GlobFilter};
use crate::path::to_slash;

const GLOB_CHARS: &[char] = &['*', '?', '['];

/// A directory to walk and how deep. `max_depth: None` walks the whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationRoot {
    /// Absolute `/`-separated directory
    pub root: String,
    /// Maximum walk depth below `root`
    pub max_depth: Option<usize>,
}

fn directory_of(path: &str, slash: usize) -> String {
    let dir = &path[..slash];
    if dir.is_empty() || dir.ends_with(':') {
        format!("{dir}/")
    } else {
        dir.to_string()
    }
}

impl EnumerationRoot {
    /// Walk root for one absolute, `/`-separated include pattern
    pub fn for_pattern(pattern: &str) -> Self {
        match pattern.find(GLOB_CHARS) {
            Some(first_glob) => {
                let slash = pattern[..first_glob].rfind('/').unwrap_or(0);
                let remainder = &pattern[slash..];
                let max_depth = if remainder.contains("**") {
                    None
                } else {
                    Some(remainder.matches('/').count().max(1))
                };
                Self {
                    root: directory_of(pattern, slash),
                    max_depth,
                }
            }
            None => {
                let trimmed = pattern.trim_end_matches('/');
                let slash = trimmed.rfind('/').unwrap_or(0);
                Self {
                    root: directory_of(trimmed, slash),
                    max_depth: Some(1),
                }
            }
        }
    }

    fn covers(&self, other: &EnumerationRoot) -> bool {
        if self.max_depth.is_some() {
            return false;
        }
        let base = self.root.trim_end_matches('/');
        other.root == self.root
            || other
                .root
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Minimal set of walks covering every include of one path segment.
#[derive(Debug, Clone, Default)]
pub struct EnumerationPlan {
    roots: Vec<EnumerationRoot>,
}

impl EnumerationPlan {
    /// Group includes sharing a root, keep the deepest walk per root, and drop roots
    /// already inside an unlimited walk.
    pub fn for_includes(includes: &[String]) -> Self {
        let mut by_root: BTreeMap<String, Option<usize>> = BTreeMap::new();
        for include in includes {
            let r = EnumerationRoot::for_pattern(include);
            by_root
                .entry(r.root)
                .and_modify(|depth| {
                    *depth = match (*depth, r.max_depth) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        _ => None,
                    }
                })
                .or_insert(r.max_depth);
        }
        let candidates: Vec<EnumerationRoot> = by_root
            .into_iter()
            .map(|(root, max_depth)| EnumerationRoot { root, max_depth })
            .collect();
        let roots = candidates
            .iter()
            .filter(|c| {
                !candidates
                    .iter()
                    .any(|other| other.root != c.root && other.covers(c))
            })
            .cloned()
            .collect();
        Self { roots }
    }

    /// Planned walks, ordered by root
    pub fn roots(&self) -> &[EnumerationRoot] {
        &self.roots
    }
}

/// Walk every root in `plan` and return the sorted, de-duplicated paths that pass
/// `filter`.
///
/// Files are always candidates, directories only with `include_dirs`. Missing roots,
/// dangling links and links back to an ancestor contribute nothing. Blocking; run it off the async executor.
pub fn enumerate_matches(
    plan: &EnumerationPlan,
    filter: &GlobFilter,
    include_dirs: bool,
    cancel: &CancellationToken,
) -> FingerprintResult<BTreeSet<String>> {
    let mut matched = BTreeSet::new();

    for walk in plan.roots() {
        if !Path::new(&walk.root).is_dir() {
            trace!(root = %walk.root, "enumeration root does not exist");
            continue;
        }
        let walker = WalkDir::new(&walk.root)
            .follow_links(true)
            .min_depth(1)
            .max_depth(walk.max_depth.unwrap_or(usize::MAX));

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(FingerprintError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                    warn!(path = ?e.path(), "skipping dangling entry");
                    continue;
                }
                Err(e) if e.loop_ancestor().is_some() => {
                    debug!(path = ?e.path(), ancestor = ?e.loop_ancestor(), "skipping symlink loop");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let file_type = entry.file_type();
            if !(file_type.is_file() || (include_dirs && file_type.is_dir())) {
                continue;
            }

            let path = to_slash(entry.path());
            match filter.decide(&path) {
                GlobDecision::Accepted { include } => {
                    trace!(%path, %include, "accepted");
                    matched.insert(path);
                }
                GlobDecision::Excluded { exclude } => trace!(%path, %exclude, "excluded"),
                GlobDecision::NotIncluded => trace!(%path, "not included"),
            }
        }
    }

    Ok(matched)
}
