//! Relative path helpers
//!
//! Every path exchanged between the scanner, the resolver, the store and the
//! remote adapter is relative to the sync root, `/`-separated, with no leading
//! or trailing slash. The empty string denotes the root itself.

use std::path::{Component, Path, PathBuf};

use super::errors::DomainError;

/// Normalizes a relative path: converts `\` to `/`, strips leading and trailing
/// slashes, drops `.` segments and collapses repeated separators.
///
/// Rejects `..` segments so that a path can never escape the sync root.
pub fn normalize(path: &str) -> Result<String, DomainError> {
    let mut parts = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(DomainError::InvalidPath(path.to_string())),
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// Last segment of a relative path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a relative path, `None` for top-level entries.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Joins a relative parent and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// All proper ancestors followed by the path itself, shortest first.
///
/// `"a/b/c"` yields `["a", "a/b", "a/b/c"]`.
pub fn ancestors_and_self(path: &str) -> Vec<&str> {
    let mut out: Vec<&str> = path
        .match_indices('/')
        .map(|(idx, _)| &path[..idx])
        .collect();
    if !path.is_empty() {
        out.push(path);
    }
    out
}

/// Whether `path` equals `prefix` or lies underneath it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Resolves a relative path against an absolute root.
pub fn to_absolute(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, s| acc.join(s))
}

/// Converts an absolute path under `root` back into a relative path.
///
/// Returns `None` when the path lies outside the root or is not valid UTF-8.
pub fn to_relative(root: &Path, absolute: &Path) -> Option<String> {
    let stripped = absolute.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}
