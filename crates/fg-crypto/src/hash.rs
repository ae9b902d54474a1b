use sha2::{Digest, Sha256};

use fg_proto::v1::Fingerprint;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Fingerprint of a unit: hex(sha256(public_key_bytes)).
///
/// `public_key` is the canonical 32-byte Ed25519 encoding. Any byte string
/// is accepted so that a verifier can recompute the claim for a malformed
/// key and reject the mismatch.
pub fn fingerprint(public_key: &[u8]) -> Fingerprint {
    Fingerprint::from(sha256(public_key))
}
