//! Local path helpers shared by the CLI and the engine

use std::io;
use std::path::{Path, PathBuf};

/// Expands a leading `~` to the user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolves a user-supplied sync root to an absolute, canonical directory
///
/// Expands `~`, anchors relative paths at the current directory and
/// creates the directory when it does not exist yet.
///
/// # Errors
///
/// Returns an error if the path exists but is not a directory, or if it
/// cannot be created.
pub fn resolve_sync_root(path: &str) -> io::Result<PathBuf> {
    let expanded = expand_tilde(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    if absolute.exists() && !absolute.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a directory: {}", absolute.display()),
        ));
    }
    ensure_directory(&absolute)?;
    std::fs::canonicalize(&absolute)
}

/// Creates `path` and its parents if missing
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
}
