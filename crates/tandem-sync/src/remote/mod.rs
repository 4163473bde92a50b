//! Remote side of the sync engine
//!
//! - [`adapter`] - `IRemoteContentStore` over a low-level object store
//! - [`memory`] - In-process object store and change feed

pub mod adapter;
pub mod memory;

pub use adapter::RemoteContentAdapter;
pub use memory::InMemoryRemote;

/// MIME type the remote store uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Prefix of native document types that have no downloadable bytes
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// Whether objects of this type can be fetched as plain bytes
pub fn is_downloadable(mime_type: Option<&str>) -> bool {
    !mime_type.is_some_and(|m| m.starts_with(NATIVE_MIME_PREFIX))
}
