//! Path normalization.
//!
//! Internally every unit path uses `/` as separator and is simplified, so
//! that suppression patterns, cache keys, and sort order all see one
//! canonical spelling of the same file.

use std::path::{Path, PathBuf};

/// Converts `\` separators to `/`.
#[must_use]
pub fn from_native_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Simplifies a `/`-separated path: drops `.` segments, collapses
/// duplicate separators, and resolves `..` against preceding segments.
///
/// Leading `..` segments of a relative path are kept.
///
/// ```ignore
/// assert_eq!(simplify("a/./b/../c"), "a/c");
/// assert_eq!(simplify("../x//y"), "../x/y");
/// ```
#[must_use]
pub fn simplify(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Normalizes a path string: `/` separators, simplified.
#[must_use]
pub fn normalize_str(path: &str) -> String {
    simplify(&from_native_separators(path))
}

/// Normalizes a path: `/` separators, simplified.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    PathBuf::from(normalize_str(&path.to_string_lossy()))
}

/// Returns the directory part of a normalized path, or `.` for bare names.
#[must_use]
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
