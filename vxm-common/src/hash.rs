//! SHA-256 helpers
//!
//! Artifact names and cache fingerprints both derive from the hex digest of
//! the raw bytes, so the two must always agree on the encoding.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Incremental hasher for streamed content
#[derive(Default)]
pub struct StreamingHash {
    hasher: Sha256,
}

impl StreamingHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Consume the hasher and return the hex digest
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}
