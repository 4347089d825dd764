//! Content fingerprinting
//!
//! Fingerprints are the lowercase hex SHA-256 of the normalized image
//! bytes. Identical bytes always produce identical fingerprints, so two
//! imports of the same photo match regardless of file name.

use sha2::{Digest, Sha256};
use std::sync::Arc;

/// SHA-256 content fingerprinting
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    pub fn new() -> Self {
        Self
    }

    /// Fingerprint an in-memory buffer
    pub fn fingerprint_bytes(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    /// Best-effort fingerprint of normalized bytes
    ///
    /// Hashing runs on the blocking pool. Any failure yields `None`; the
    /// caller imports the photo without a fingerprint.
    pub async fn try_fingerprint(&self, bytes: Arc<Vec<u8>>) -> Option<String> {
        match tokio::task::spawn_blocking(move || Self::fingerprint_bytes(&bytes)).await {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                tracing::warn!(error = %e, "Fingerprinting failed, importing without fingerprint");
                None
            }
        }
    }
}
