//! Conflict domain types
//!
//! This module defines the resolution policies a configuration can pick and
//! the snapshot produced when both sides of a file diverged from the baseline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, RelativePath, RemoteId};

/// How a detected conflict is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Keep both versions: rename the local file aside, then download remote
    #[default]
    Rename,
    /// Upload local, overwriting remote
    LocalWins,
    /// Download remote, overwriting local
    RemoteWins,
}

impl ConflictStrategy {
    /// Canonical names accepted by [`ConflictStrategy::from_str`]
    pub const VALID_NAMES: &'static [&'static str] = &["rename", "local-wins", "remote-wins"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Rename => "rename",
            ConflictStrategy::LocalWins => "local-wins",
            ConflictStrategy::RemoteWins => "remote-wins",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = DomainError;

    /// Parses a strategy name; an empty string selects the default
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "rename" => Ok(ConflictStrategy::Rename),
            "local-wins" | "local_wins" | "localwins" => Ok(ConflictStrategy::LocalWins),
            "remote-wins" | "remote_wins" | "remotewins" => Ok(ConflictStrategy::RemoteWins),
            _ => Err(DomainError::InvalidStrategy(s.to_string())),
        }
    }
}

/// Snapshot of a file whose local and remote content both changed
///
/// Produced by conflict detection and consumed once by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub rel_path: RelativePath,
    pub remote_id: Option<RemoteId>,
    pub local_md5: ContentHash,
    pub remote_md5: ContentHash,
    pub local_mtime: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
    /// Baseline fingerprints recorded at the last reconciliation
    pub last_sync_local_md5: Option<ContentHash>,
    pub last_sync_remote_md5: Option<ContentHash>,
    pub last_sync_mtime: Option<DateTime<Utc>>,
    pub local_modified: bool,
    pub remote_modified: bool,
}

impl ConflictInfo {
    /// Both sides diverged from the baseline
    pub fn is_conflict(&self) -> bool {
        self.local_modified && self.remote_modified
    }
}
