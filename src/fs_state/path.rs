//! Lexical path normalization.
//!
//! Paths are never canonicalized against the real file system here; the
//! interned form must be computable for files that do not exist yet.

use std::path::Path;

/// Check whether a separator-normalized path string is absolute.
///
/// Accepts both unix roots (`/usr/lib`) and drive roots (`C:/Root`), so
/// graphs produced on one platform stay readable on another.
pub fn is_absolute_path(path: &str) -> bool {
    path.starts_with('/') || drive_prefix(path).is_some()
}

fn drive_prefix(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some(&path[..2])
    } else {
        None
    }
}

/// Combine `working_directory` and `path` into an absolute, `/`-separated
/// path with `.` and `..` segments resolved.
///
/// If `path` is already absolute the working directory is ignored. A
/// relative result is only possible when both inputs are relative.
pub fn normalize_path(path: &Path, working_directory: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    let combined = if is_absolute_path(&path) {
        path
    } else {
        let working_directory = working_directory.to_string_lossy().replace('\\', "/");
        if working_directory.is_empty() {
            path
        } else {
            format!("{}/{}", working_directory, path)
        }
    };

    let (root, rest) = if let Some(drive) = drive_prefix(&combined) {
        (format!("{}/", drive), &combined[2..])
    } else if combined.starts_with('/') {
        ("/".to_string(), &combined[1..])
    } else {
        (String::new(), combined.as_str())
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                // Cannot climb above a root
                _ if !root.is_empty() => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    if root.is_empty() && segments.is_empty() {
        return ".".to_string();
    }

    let mut normalized = root;
    normalized.push_str(&segments.join("/"));
    normalized
}
