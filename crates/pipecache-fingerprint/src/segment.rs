//! Key segment classification: literal text or a path expression.

use crate::error::{FingerprintError, FingerprintResult};

/// Characters that make a segment unusable as a path, so it is taken literally.
fn is_invalid_path_char(c: char) -> bool {
    c.is_control() || matches!(c, '<' | '>' | '|' | '"')
}

/// A path expression: comma-separated rules, `!` marking excludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    /// Segment text as written
    pub text: String,
    /// Include rules, unresolved
    pub includes: Vec<String>,
    /// Exclude rules, unresolved and without the leading `!`
    pub excludes: Vec<String>,
}

impl PathExpression {
    fn parse(text: &str) -> FingerprintResult<Self> {
        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        for rule in text.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            match rule.strip_prefix('!') {
                Some(exclude) => {
                    let exclude = exclude.trim();
                    if !exclude.is_empty() {
                        excludes.push(exclude.to_string());
                    }
                }
                None => includes.push(rule.to_string()),
            }
        }
        if includes.is_empty() {
            return Err(FingerprintError::NoIncludeRules(text.to_string()));
        }
        Ok(Self {
            text: text.to_string(),
            includes,
            excludes,
        })
    }
}

/// One classified key segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// Used verbatim in the fingerprint
    Literal(String),
    /// Resolved against the filesystem
    Path(PathExpression),
}

/// Classify one raw segment.
///
/// `"…"` is always a literal (quotes stripped). Otherwise a segment is a path expression
/// when it contains a `.` or a separator, does not end with `.`, and has no characters
/// that are invalid in a path. Surrounding whitespace is ignored for classification;
/// an unquoted literal keeps `raw` exactly.
pub fn parse_segment(index: usize, raw: &str) -> FingerprintResult<KeySegment> {
    let segment = raw.trim();
    if segment.is_empty() {
        return Err(FingerprintError::EmptySegment { index });
    }
    if segment == "*" || segment == "**" {
        return Err(FingerprintError::ReservedSegment(segment.to_string()));
    }
    if segment.starts_with('\'') {
        return Err(FingerprintError::ReservedQuote(segment.to_string()));
    }
    if let Some(rest) = segment.strip_prefix('"') {
        return match rest.strip_suffix('"') {
            Some(inner) => Ok(KeySegment::Literal(inner.to_string())),
            None => Err(FingerprintError::UnterminatedQuote(segment.to_string())),
        };
    }

    let pathy = !segment.chars().any(is_invalid_path_char)
        && segment.contains(&['.', '/', '\\'][..])
        && !segment.ends_with('.');
    if pathy {
        Ok(KeySegment::Path(PathExpression::parse(segment)?))
    } else {
        Ok(KeySegment::Literal(raw.to_string()))
    }
}
