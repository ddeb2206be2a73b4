//! Minimatch-style glob compilation.
//!
//! Patterns are compiled with `globset`: `*` and `?` never cross a `/`, `**` spans
//! directories, dotfiles match like any other name, and `{a,b}` alternation is disabled by
//! escaping the braces. Matching is case-insensitive on Windows only.

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};

use crate::error::{FingerprintError, FingerprintResult};

/// Escape `{` and `}` outside character classes so they match literally.
fn escape_braces(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut in_class = false;
    for c in pattern.chars() {
        match c {
            '[' if !in_class => {
                in_class = true;
                out.push(c);
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            '{' | '}' if !in_class => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

fn build(pattern: &str) -> FingerprintResult<globset::Glob> {
    GlobBuilder::new(&escape_braces(pattern))
        .literal_separator(true)
        .case_insensitive(cfg!(windows))
        .backslash_escape(!cfg!(windows))
        .build()
        .map_err(|e| FingerprintError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}

/// One compiled rule. An inverted predicate matches everything the pattern does not.
#[derive(Debug, Clone)]
pub struct GlobPredicate {
    pattern: String,
    matcher: GlobMatcher,
    invert: bool,
}

impl GlobPredicate {
    /// Source pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the result is negated
    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    /// Test a `/`-separated path
    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path) != self.invert
    }
}

/// Compile `pattern` into a predicate, negated when `invert` is set.
pub fn compile(pattern: &str, invert: bool) -> FingerprintResult<GlobPredicate> {
    Ok(GlobPredicate {
        pattern: pattern.to_string(),
        matcher: build(pattern)?.compile_matcher(),
        invert,
    })
}

/// Outcome of running a path through a [`GlobFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobDecision<'a> {
    /// Matched an include and no exclude
    Accepted {
        /// First include pattern that matched
        include: &'a str,
    },
    /// Matched no include
    NotIncluded,
    /// Matched an include but also an exclude
    Excluded {
        /// First exclude pattern that matched
        exclude: &'a str,
    },
}

impl GlobDecision<'_> {
    /// True for [`GlobDecision::Accepted`]
    pub fn is_accepted(&self) -> bool {
        matches!(self, GlobDecision::Accepted { .. })
    }
}

/// Include/exclude rule set: a path passes if it matches any include and no exclude.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl GlobFilter {
    /// Compile both rule lists. An empty include list matches nothing.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> FingerprintResult<Self> {
        let include_set = Self::compile_set(&include)?;
        let exclude_set = Self::compile_set(&exclude)?;
        Ok(Self {
            include,
            exclude,
            include_set,
            exclude_set,
        })
    }

    fn compile_set(patterns: &[String]) -> FingerprintResult<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(build(pattern)?);
        }
        builder.build().map_err(|e| FingerprintError::InvalidGlob {
            pattern: patterns.join(","),
            reason: e.kind().to_string(),
        })
    }

    /// Include patterns
    pub fn include_patterns(&self) -> &[String] {
        &self.include
    }

    /// Exclude patterns
    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude
    }

    /// Classify a `/`-separated path
    pub fn decide(&self, path: &str) -> GlobDecision<'_> {
        let Some(i) = self.include_set.matches(path).into_iter().min() else {
            return GlobDecision::NotIncluded;
        };
        match self.exclude_set.matches(path).into_iter().min() {
            Some(x) => GlobDecision::Excluded {
                exclude: &self.exclude[x],
            },
            None => GlobDecision::Accepted {
                include: &self.include[i],
            },
        }
    }

    /// True if the path matches any include and no exclude
    pub fn matches(&self, path: &str) -> bool {
        self.include_set.is_match(path) && !self.exclude_set.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> GlobFilter {
        GlobFilter::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn star_does_not_cross_separator() {
        let p = compile("/w/*.txt", false).unwrap();
        assert!(p.matches("/w/a.txt"));
        assert!(!p.matches("/w/sub/a.txt"));
    }

    #[test]
    fn globstar_matches_zero_or_more_directories() {
        let p = compile("/w/**/dir1", false).unwrap();
        assert!(p.matches("/w/dir1"));
        assert!(p.matches("/w/a/b/dir1"));
        assert!(!p.matches("/w/dir1/file"));
    }

    #[test]
    fn dotfiles_are_matchable() {
        let p = compile("/w/*", false).unwrap();
        assert!(p.matches("/w/.env"));
    }

    #[test]
    fn braces_are_literal() {
        let p = compile("/w/{a,b}.txt", false).unwrap();
        assert!(p.matches("/w/{a,b}.txt"));
        assert!(!p.matches("/w/a.txt"));
        let class = compile("/w/[{]x", false).unwrap();
        assert!(class.matches("/w/{x"));
    }

    #[test]
    fn inverted_predicate_negates() {
        let p = compile("/w/**/*.tmp", true).unwrap();
        assert!(p.is_inverted());
        assert!(!p.matches("/w/a.tmp"));
        assert!(p.matches("/w/a.txt"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let f = filter(&["/w/**/*.rs"], &["/w/target/**"]);
        assert!(f.matches("/w/src/lib.rs"));
        assert!(!f.matches("/w/target/debug/build.rs"));
        assert_eq!(
            f.decide("/w/target/x.rs"),
            GlobDecision::Excluded {
                exclude: "/w/target/**"
            }
        );
        assert_eq!(f.decide("/w/readme.md"), GlobDecision::NotIncluded);
        assert!(f.decide("/w/a.rs").is_accepted());
    }

    #[test]
    fn empty_include_list_matches_nothing() {
        let f = filter(&[], &[]);
        assert!(!f.matches("/anything"));
    }

    #[test]
    fn invalid_pattern_names_itself() {
        let err = compile("/w/[abc", false).unwrap_err();
        match err {
            FingerprintError::InvalidGlob { pattern, .. } => assert_eq!(pattern, "/w/[abc"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn matching_is_case_sensitive_off_windows() {
        let p = compile("/w/Makefile", false).unwrap();
        assert!(!p.matches("/w/makefile"));
    }
}
