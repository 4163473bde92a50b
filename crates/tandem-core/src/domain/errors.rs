//! Errors raised while building or mutating domain values

use thiserror::Error;

/// A domain value was rejected
///
/// Carries strings rather than sources so it stays `Clone + Eq` and can be
/// compared in tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid relative path: {0}")]
    InvalidPath(String),

    /// Expected 32 lowercase hex digits
    #[error("invalid MD5 digest: {0}")]
    InvalidHash(String),

    #[error("sync state cannot move from {from} to {to}")]
    InvalidState { from: String, to: String },

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0} is outside the sync root")]
    PathNotInSyncRoot(String),

    #[error("invalid remote object id: {0}")]
    InvalidRemoteId(String),

    #[error("invalid change cursor: {0}")]
    InvalidCursor(String),

    #[error("unknown conflict strategy '{0}' (expected rename, local-wins or remote-wins)")]
    InvalidStrategy(String),

    #[error("invalid row id: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_message_names_both_states() {
        let err = DomainError::InvalidState {
            from: "pending_download".to_string(),
            to: "conflict".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "sync state cannot move from pending_download to conflict"
        );
    }

    #[test]
    fn test_strategy_message_lists_choices() {
        let msg = DomainError::InvalidStrategy("merge".to_string()).to_string();
        for expected in ["'merge'", "rename", "local-wins", "remote-wins"] {
            assert!(msg.contains(expected), "{msg}");
        }
    }

    #[test]
    fn test_outside_root_message() {
        let err = DomainError::PathNotInSyncRoot("/etc/passwd".to_string());
        assert_eq!(err.to_string(), "/etc/passwd is outside the sync root");
    }
}
