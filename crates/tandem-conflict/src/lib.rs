//! Tandem Conflict - Conflict detection and resolution
//!
//! Provides:
//! - Three-way, hash-based conflict detection against the last-synced baseline
//! - Timestamped conflict copy names
//! - A resolver applying the configured strategy (rename, local-wins, remote-wins)
//!   and recording every resolution in the sync log

pub mod detector;
pub mod error;
pub mod namer;
pub mod resolver;

pub use detector::ConflictDetector;
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use resolver::{ConflictResolver, ResolveOutcome};
