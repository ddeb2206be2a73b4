//! Fingerprint evaluation: key segments in, [`Fingerprint`] out.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use pipecache_exec::{run_bounded, BoundedOptions};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::enumerate::{enumerate_matches, EnumerationPlan};
use crate::error::{FingerprintError, FingerprintResult};
use crate::fingerprint::{Fingerprint, FingerprintKind};
use crate::glob::GlobFilter;
use crate::path::{lexical_normalize, relative_to, resolve_rule, to_slash};
use crate::segment::{parse_segment, KeySegment, PathExpression};

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Stream a file through SHA-256, returning its length and hex digest
fn hash_file(path: &str) -> FingerprintResult<(u64, String)> {
    let file = File::open(path).map_err(|e| FingerprintError::io(path, e))?;
    let mut reader = BufReader::with_capacity(1 << 20, file);
    let mut hasher = Sha256::new();
    let len = std::io::copy(&mut reader, &mut hasher).map_err(|e| FingerprintError::io(path, e))?;
    Ok((len, hex::encode(hasher.finalize())))
}

/// Per-file summary folded into a Key-mode slot
fn file_summary(display: &str, len: u64, content_hash: &str) -> String {
    sha256_hex(format!("\nSHA256({display})=[{len}]{content_hash}").as_bytes())
}

struct SegmentMatches {
    plan: EnumerationPlan,
    paths: BTreeSet<String>,
}

/// Evaluates key segments against a directory tree.
#[derive(Debug, Clone)]
pub struct FingerprintCreator {
    default_working_directory: Option<PathBuf>,
    hashing: BoundedOptions,
}

impl Default for FingerprintCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintCreator {
    /// Resolve relative rules against the evaluation root and hash with host parallelism
    pub fn new() -> Self {
        Self {
            default_working_directory: None,
            hashing: BoundedOptions::for_host(),
        }
    }

    /// Resolve relative rules against `dir` instead of the evaluation root
    pub fn with_default_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_working_directory = Some(dir.into());
        self
    }

    /// Limits for the file hashing runner
    pub fn with_hashing_options(mut self, options: BoundedOptions) -> Self {
        self.hashing = options;
        self
    }

    /// Evaluate `segments` under `root`.
    ///
    /// All segments are parsed before any filesystem access, so malformed input fails
    /// without side effects. Path segments that match nothing are collected and reported
    /// together as [`FingerprintError::NoMatches`].
    #[instrument(skip(self, segments, cancel), fields(root = %root.display()))]
    pub async fn evaluate(
        &self,
        root: &Path,
        segments: &[String],
        kind: FingerprintKind,
        cancel: &CancellationToken,
    ) -> FingerprintResult<Fingerprint> {
        let parsed = segments
            .iter()
            .enumerate()
            .map(|(i, s)| parse_segment(i, s))
            .collect::<FingerprintResult<Vec<_>>>()?;

        let root = if root.is_absolute() {
            lexical_normalize(root)
        } else {
            let cwd = std::env::current_dir().map_err(|e| FingerprintError::io(root, e))?;
            lexical_normalize(&cwd.join(root))
        };
        let root_text = to_slash(&root);
        let base = match &self.default_working_directory {
            Some(dir) => root.join(dir),
            None => root.clone(),
        };

        let mut resolved = Vec::with_capacity(parsed.len());
        let mut unmatched = Vec::new();
        for segment in parsed {
            if cancel.is_cancelled() {
                return Err(FingerprintError::Cancelled);
            }
            let expr = match segment {
                KeySegment::Literal(text) => {
                    resolved.push(text);
                    continue;
                }
                KeySegment::Path(expr) => expr,
            };

            let matches = self.find_matches(&expr, &base, kind, cancel).await?;
            if matches.paths.is_empty() {
                debug!(segment = %expr.text, "segment matched nothing");
                unmatched.push(expr.text);
                continue;
            }
            match kind {
                FingerprintKind::Key => {
                    let slot = self
                        .content_summary(&root_text, matches.paths, cancel)
                        .await?;
                    info!(segment = %expr.text, %slot, "resolved key segment");
                    resolved.push(slot);
                }
                FingerprintKind::Path => {
                    let paths = relative_paths(&expr, &root_text, &matches)?;
                    info!(segment = %expr.text, matched = paths.len(), "resolved path segment");
                    resolved.extend(paths);
                }
            }
        }

        if !unmatched.is_empty() {
            return Err(FingerprintError::NoMatches(unmatched));
        }
        Ok(Fingerprint::new(resolved))
    }

    async fn find_matches(
        &self,
        expr: &PathExpression,
        base: &Path,
        kind: FingerprintKind,
        cancel: &CancellationToken,
    ) -> FingerprintResult<SegmentMatches> {
        let includes: Vec<String> = expr.includes.iter().map(|r| resolve_rule(r, base)).collect();
        let excludes: Vec<String> = expr.excludes.iter().map(|r| resolve_rule(r, base)).collect();
        let plan = EnumerationPlan::for_includes(&includes);
        let filter = GlobFilter::new(includes, excludes)?;

        let walk_plan = plan.clone();
        let token = cancel.clone();
        let include_dirs = kind == FingerprintKind::Path;
        let paths = tokio::task::spawn_blocking(move || {
            enumerate_matches(&walk_plan, &filter, include_dirs, &token)
        })
        .await??;
        Ok(SegmentMatches { plan, paths })
    }

    /// Hash every file, summarise each, sort the summaries and fold them into one value
    async fn content_summary(
        &self,
        root: &str,
        paths: BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> FingerprintResult<String> {
        let root = root.to_string();
        let mut summaries = run_bounded(
            paths.into_iter().collect::<Vec<_>>(),
            self.hashing,
            move |path: String| {
                let display = relative_to(&path, &root).unwrap_or_else(|| path.clone());
                async move {
                    let (len, hash) =
                        tokio::task::spawn_blocking(move || hash_file(&path)).await??;
                    Ok::<_, FingerprintError>(file_summary(&display, len, &hash))
                }
            },
            cancel,
        )
        .await?;

        summaries.sort_unstable();
        Ok(sha256_hex(summaries.concat().as_bytes()))
    }
}

/// Display paths for a Path-mode segment, relative to the root where possible
fn relative_paths(
    expr: &PathExpression,
    root: &str,
    matches: &SegmentMatches,
) -> FingerprintResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for path in &matches.paths {
        match relative_to(path, root) {
            Some(rel) => {
                out.insert(rel);
            }
            None if matches.plan.roots().len() > 1 => {
                return Err(FingerprintError::AmbiguousRelativeBase {
                    segment: expr.text.clone(),
                    roots: matches.plan.roots().iter().map(|r| r.root.clone()).collect(),
                });
            }
            None => {
                out.insert(path.clone());
            }
        }
    }
    Ok(out)
}
