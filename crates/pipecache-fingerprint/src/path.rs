//! Lexical path handling for key segments.
//!
//! Rules are resolved without touching the filesystem: no symlink resolution and no
//! existence checks. Every path handed to the glob filter or shown in a fingerprint is an
//! absolute, `/`-separated string.

use std::path::{Component, Path, PathBuf};

/// Remove `.` and `..` components without resolving symlinks.
///
/// A `..` that would climb above the root is dropped for absolute paths and kept for
/// relative ones.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                Some(Component::ParentDir) | None => components.push(component),
                Some(_) => {
                    components.pop();
                }
            },
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// Render a path with `/` separators.
pub fn to_slash(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        text.replace('\\', "/")
    } else {
        text.into_owned()
    }
}

/// Resolve one include/exclude rule to an absolute, normalized, `/`-separated pattern.
///
/// Relative rules are joined onto `base`. Glob characters are ordinary path text here.
pub fn resolve_rule(rule: &str, base: &Path) -> String {
    let rule_path = Path::new(rule);
    let joined = if rule_path.is_absolute() {
        rule_path.to_path_buf()
    } else {
        base.join(rule_path)
    };
    to_slash(&lexical_normalize(&joined))
}

fn split_prefix(path: &str) -> (&str, Vec<&str>) {
    let (prefix, rest) = match path.find('/') {
        Some(0) => ("", path),
        Some(i) => path.split_at(i),
        None => (path, ""),
    };
    let parts = rest.split('/').filter(|p| !p.is_empty()).collect();
    (prefix, parts)
}

fn same_component(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Express the absolute `/`-separated `path` relative to `base`, climbing with `..`.
///
/// Returns `None` when the two share no common base, e.g. different drive letters.
/// `path == base` renders as `.`.
pub fn relative_to(path: &str, base: &str) -> Option<String> {
    let (path_prefix, path_parts) = split_prefix(path);
    let (base_prefix, base_parts) = split_prefix(base);
    if !path_prefix.eq_ignore_ascii_case(base_prefix) {
        return None;
    }

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| same_component(a, b))
        .count();

    let mut out: Vec<&str> = std::iter::repeat("..")
        .take(base_parts.len() - common)
        .collect();
    out.extend_from_slice(&path_parts[common..]);

    if out.is_empty() {
        Some(".".to_string())
    } else {
        Some(out.join("/"))
    }
}
