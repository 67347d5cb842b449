//! SHA-256 digest helpers for the checksum-paired status artifact (spec.md
//! §4.3). `sha2` is not part of the teacher's own stack, but it is the hash
//! crate used elsewhere in the retrieval pack wherever a real cryptographic
//! digest (as opposed to a change-detection hash) is actually required.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
