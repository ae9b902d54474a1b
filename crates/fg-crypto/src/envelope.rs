//! Signed envelopes.
//!
//! `signature = Ed25519(sender_seed, sha256(payload))`. Payloads are signed,
//! not sealed.
//!
//! Verification order matters: the claimed `sender_fingerprint` is first
//! recomputed from the embedded public key, and only then is the signature
//! checked against that key. Skipping the first step would let any valid
//! keypair speak for an arbitrary fingerprint.

use fg_proto::v1::{EnvelopeV1, Fingerprint};
use fg_proto::validation::{PUBLIC_KEY_LEN, SIGNATURE_LEN};

use crate::hash::{fingerprint, sha256};
use crate::identity::{verify_signature, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("sender_fingerprint does not match sender_public_key")]
    FingerprintMismatch,
    #[error("signature verification failed")]
    InvalidSignature,
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayload {
    pub payload: Vec<u8>,
    /// Authenticated sender.
    pub sender: Fingerprint,
    pub public_key: [u8; 32],
}

/// Build a signed envelope for `payload`.
pub fn sign(identity: &Identity, payload: &[u8]) -> EnvelopeV1 {
    let digest = sha256(payload);
    EnvelopeV1 {
        sender_fingerprint: identity.fingerprint().to_string(),
        sender_public_key: identity.public_key().to_vec(),
        payload: payload.to_vec(),
        signature: identity.sign(&digest).to_vec(),
    }
}

/// Verify `env` and return the payload with its authenticated sender.
pub fn verify(env: &EnvelopeV1) -> Result<VerifiedPayload, VerificationError> {
    let derived = fingerprint(&env.sender_public_key);
    if derived.as_str() != env.sender_fingerprint {
        return Err(VerificationError::FingerprintMismatch);
    }

    // The claim matches, but the key bytes may still not be a usable key
    let public_key: [u8; PUBLIC_KEY_LEN] = env
        .sender_public_key
        .as_slice()
        .try_into()
        .map_err(|_| VerificationError::InvalidSignature)?;
    let signature: [u8; SIGNATURE_LEN] = env
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| VerificationError::InvalidSignature)?;

    if !verify_signature(&public_key, &sha256(&env.payload), &signature) {
        return Err(VerificationError::InvalidSignature);
    }

    Ok(VerifiedPayload {
        payload: env.payload.clone(),
        sender: derived,
        public_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let identity = Identity::generate().unwrap();
        let env = sign(&identity, b"hello unit");

        let verified = verify(&env).unwrap();
        assert_eq!(verified.payload, b"hello unit");
        assert_eq!(verified.sender, identity.fingerprint());
        assert_eq!(verified.public_key, identity.public_key());
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let identity = Identity::generate().unwrap();
        let verified = verify(&sign(&identity, b"")).unwrap();
        assert!(verified.payload.is_empty());
    }

    #[test]
    fn test_payload_tamper_detected() {
        let identity = Identity::generate().unwrap();
        let mut env = sign(&identity, b"attack at dawn");
        env.payload[0] ^= 0x01;
        assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn test_signature_tamper_detected() {
        let identity = Identity::generate().unwrap();
        let mut env = sign(&identity, b"attack at dawn");
        env.signature[10] ^= 0x80;
        assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn test_key_substitution_is_fingerprint_mismatch() {
        let victim = Identity::generate().unwrap();
        let attacker = Identity::generate().unwrap();

        // Attacker signs with its own key but claims the victim's fingerprint
        let mut env = sign(&attacker, b"trust me");
        env.sender_fingerprint = victim.fingerprint().to_string();
        assert_eq!(verify(&env), Err(VerificationError::FingerprintMismatch));

        // Swapping the key in a victim envelope fails the same way
        let mut env = sign(&victim, b"original");
        env.sender_public_key = attacker.public_key().to_vec();
        assert_eq!(verify(&env), Err(VerificationError::FingerprintMismatch));
    }

    #[test]
    fn test_consistent_claim_with_foreign_signature_is_invalid() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();

        // Fingerprint/key pair is consistent, but the signature is from b
        let mut env = sign(&a, b"payload");
        env.signature = sign(&b, b"payload").signature;
        assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn test_truncated_key_with_matching_claim_is_invalid_signature() {
        let identity = Identity::generate().unwrap();
        let mut env = sign(&identity, b"payload");
        env.sender_public_key.truncate(16);
        env.sender_fingerprint = fingerprint(&env.sender_public_key).to_string();
        assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn test_truncated_signature_is_invalid() {
        let identity = Identity::generate().unwrap();
        let mut env = sign(&identity, b"payload");
        env.signature.pop();
        assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }
}
