//! Ignore rules shared by the watcher and the initial scan

/// Name of the per-root directory holding engine scratch files
pub const INTERNAL_DIR: &str = ".tandem";

const IGNORED_DIRS: &[&str] = &[".git", INTERNAL_DIR, "node_modules", "__pycache__"];

const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Whether a root-relative path (forward slashes) is excluded from sync
///
/// A path is ignored when any segment is dot-prefixed (other than `.` and
/// `..`), names a tool or cache directory, or when the last segment is an
/// editor backup (`~` suffix) or OS metadata file.
pub fn is_ignored(rel_path: &str) -> bool {
    let mut last = None;

    for segment in rel_path.split(['/', '\\']) {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        if segment.starts_with('.') || IGNORED_DIRS.contains(&segment) {
            return true;
        }
        last = Some(segment);
    }

    match last {
        Some(name) => name.ends_with('~') || IGNORED_FILES.contains(&name),
        None => false,
    }
}
