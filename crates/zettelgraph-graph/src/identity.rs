//! Stable identity of filesystem entries.
//!
//! Files are keyed by the earliest of their ctime/mtime in nanoseconds,
//! which approximates a creation time and survives a rename. Directories
//! are keyed by a hash of their root-relative path, so a directory rename
//! yields a different key on the next build.

use sha2::{Digest, Sha256};
use std::fs::Metadata;

pub fn file_identity(meta: &Metadata) -> String {
    earliest_timestamp_ns(meta).to_string()
}

/// `dir_` + hex SHA-256 of the normalized relative path.
pub fn dir_identity(rel_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rel_path.trim_matches('/').as_bytes());
    format!("dir_{:x}", hasher.finalize())
}

#[cfg(unix)]
fn earliest_timestamp_ns(meta: &Metadata) -> i128 {
    use std::os::unix::fs::MetadataExt;

    let ctime = i128::from(meta.ctime()) * 1_000_000_000 + i128::from(meta.ctime_nsec());
    let mtime = i128::from(meta.mtime()) * 1_000_000_000 + i128::from(meta.mtime_nsec());
    ctime.min(mtime)
}

#[cfg(not(unix))]
fn earliest_timestamp_ns(meta: &Metadata) -> i128 {
    use std::time::UNIX_EPOCH;

    [meta.created().ok(), meta.modified().ok()]
        .into_iter()
        .flatten()
        .filter_map(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .min()
        .unwrap_or_default()
}
