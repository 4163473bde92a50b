//! Tandem Audit - The user-visible sync log
//!
//! Provides:
//! - `SyncLogger`: typed writers for every sync log action of one configuration
//! - `FailedAction` / `ErrorSource`: structured codes carried by error entries
//! - Integration with `ISyncStateStore` for persistent, append-only storage

pub mod logger;
pub mod reason;

pub use logger::SyncLogger;
pub use reason::{ErrorSource, FailedAction};
