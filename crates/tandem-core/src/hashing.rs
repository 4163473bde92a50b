//! Content fingerprints
//!
//! Files are identified by the MD5 of their bytes, the same checksum the
//! remote store advertises. Reads are chunked so memory stays flat for
//! large files.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::domain::newtypes::ContentHash;

/// Size of each read while hashing
const CHUNK_SIZE: usize = 64 * 1024;

/// Computes the MD5 fingerprint of a file
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be opened or read.
pub fn compute_md5(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(ContentHash::from_md5(hasher.finalize().into()))
}

/// MD5 of an in-memory buffer
pub fn md5_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::from_md5(Md5::digest(bytes).into())
}

/// Runs [`compute_md5`] on the blocking thread pool
pub async fn compute_md5_async(path: PathBuf) -> io::Result<ContentHash> {
    tokio::task::spawn_blocking(move || compute_md5(&path))
        .await
        .map_err(io::Error::other)?
}
