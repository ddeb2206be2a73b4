//! Fingerprint value type and key-string parsing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved trailing segment that turns a lookup into a prefix match.
pub const WILDCARD: &str = "**";

/// How path segments resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintKind {
    /// One content hash per path segment
    Key,
    /// The matched relative paths of each path segment
    Path,
}

/// Ordered sequence of resolved segments. Equality is the cache-hit predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    segments: Vec<String>,
}

impl Fingerprint {
    /// Wrap already-resolved segments
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Resolved segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Consume into the segment list
    pub fn into_segments(self) -> Vec<String> {
        self.segments
    }

    /// Prepend a slot, e.g. a salt
    pub fn prepend(&mut self, segment: impl Into<String>) {
        self.segments.insert(0, segment.into());
    }

    /// Copy of this fingerprint with [`WILDCARD`] appended
    pub fn with_wildcard(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.push(WILDCARD.to_string());
        Self { segments }
    }

    /// True if the last segment is [`WILDCARD`]
    pub fn is_wildcard(&self) -> bool {
        self.segments.last().is_some_and(|s| s == WILDCARD)
    }

    /// Whether `other` satisfies this fingerprint as a lookup.
    ///
    /// Without a trailing wildcard this is equality; with one, the remaining segments must
    /// be a prefix of `other`.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        if !self.is_wildcard() {
            return self == other;
        }
        let prefix = &self.segments[..self.segments.len() - 1];
        other.segments.len() >= prefix.len() && other.segments[..prefix.len()] == *prefix
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("|"))
    }
}

/// Split a user key string into segments on `|` and newlines, dropping blank pieces.
pub fn split_key(key: &str) -> Vec<String> {
    key.split(&['|', '\n'][..])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(segments: &[&str]) -> Fingerprint {
        Fingerprint::new(segments.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn split_key_handles_both_delimiters() {
        assert_eq!(
            split_key("npm | \"linux\"\n package-lock.json |\r\n"),
            vec!["npm", "\"linux\"", "package-lock.json"]
        );
        assert!(split_key(" | \n").is_empty());
    }

    #[test]
    fn wildcard_is_a_prefix_match() {
        let entry = fp(&["npm", "linux", "abc123"]);
        assert!(fp(&["npm", "linux"]).with_wildcard().matches(&entry));
        assert!(fp(&["npm", "linux", "abc123", "**"]).matches(&entry));
        assert!(!fp(&["npm", "mac"]).with_wildcard().matches(&entry));
        assert!(!fp(&["npm", "linux"]).matches(&entry));
        assert!(entry.matches(&entry.clone()));
    }

    #[test]
    fn display_joins_segments() {
        let mut f = fp(&["a", "b"]);
        f.prepend("salt=1");
        assert_eq!(f.to_string(), "salt=1|a|b");
        assert!(!f.is_wildcard());
    }
}
