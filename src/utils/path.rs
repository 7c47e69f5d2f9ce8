//! Helpers for the relative paths used as entry names inside archives

use std::path::Path;

/// Normalize a path in archive to its forward-slash relative form
///
/// Backslashes become slashes, empty and `.` segments are dropped, and
/// the result never starts or ends with a slash.
///
/// # Example
/// ```ignore
/// assert_eq!(normalize_relative("\\subfolder1\\bla bla/file3.txt"), "subfolder1/bla bla/file3.txt");
/// ```
pub fn normalize_relative(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Key used to compare entry names case-insensitively
pub fn entry_key(path: &str) -> String {
    normalize_relative(path).to_lowercase()
}

/// Parent part of a normalized relative path (empty for top-level entries)
pub fn relative_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..index],
        None => "",
    }
}

/// Join a remote base directory and a relative path with a single slash
pub fn join_remote(base: &str, relative: &str) -> String {
    let rooted = base.starts_with(['/', '\\']);
    let base = base.trim_end_matches(['/', '\\']);
    let relative = normalize_relative(relative);
    if base.is_empty() {
        if rooted {
            format!("/{}", relative)
        } else {
            relative
        }
    } else if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, relative)
    }
}

/// Compare two local paths the way the host filesystem does
pub fn same_local_path(a: &Path, b: &Path) -> bool {
    if cfg!(windows) {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}
