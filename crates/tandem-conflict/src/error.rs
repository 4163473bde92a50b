//! Error types for the conflict engine

use std::path::PathBuf;

use tandem_core::ports::RemoteError;
use thiserror::Error;

/// Errors that can occur during conflict detection and resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Renaming the local file to its conflict copy failed
    #[error("failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the local file failed
    #[error("failed to read local file {path}: {source}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload or download against the remote store failed
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    /// The item was never uploaded so the remote side cannot be fetched
    #[error("no remote id recorded for {0}")]
    MissingRemoteId(String),

    /// Every candidate conflict name is taken
    #[error("no free conflict name for {0}")]
    NameExhausted(String),
}
