//! Domain entities and business rules
//!
//! This module contains the core domain types for tandem:
//! - Newtypes for type-safe identifiers and validated values
//! - Sync configurations and per-file sync items with their state machine
//! - The append-only sync log and derived status
//! - Conflict resolution policies
//! - Domain-specific error types

pub mod conflict;
pub mod errors;
pub mod newtypes;
pub mod status;
pub mod sync_config;
pub mod sync_item;
pub mod sync_log;

// Re-export commonly used types
pub use conflict::{ConflictInfo, ConflictStrategy};
pub use errors::DomainError;
pub use newtypes::*;
pub use status::SyncStatus;
pub use sync_config::{NewSyncConfig, SyncConfig};
pub use sync_item::{SyncItem, SyncItemParts, SyncState};
pub use sync_log::{NewSyncLogEntry, SyncAction, SyncLogEntry};
