//! Corpus fingerprinting.
//!
//! The fingerprint is the SHA-256 of the concatenated hex SHA-256 digests of
//! every regular file directly under the documents directory, taken in
//! sorted path order. It changes whenever any file is added, removed or
//! modified, and is independent of directory iteration order. It is a cache
//! validity token only.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::loader::corpus_files;

/// Hex SHA-256 of a file's raw bytes.
pub fn file_digest(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Compute the corpus fingerprint for `dir`. A missing directory hashes like
/// an empty one.
pub fn compute_fingerprint(dir: &Path) -> Result<String> {
    let mut combined = String::new();
    for path in corpus_files(dir)? {
        combined.push_str(&file_digest(&path)?);
    }
    Ok(hex::encode(Sha256::digest(combined.as_bytes())))
}
