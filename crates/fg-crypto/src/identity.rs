//! Unit identity: an Ed25519 keypair and the fingerprint derived from it.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use fg_proto::v1::Fingerprint;

use crate::hash::fingerprint;

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no keypair found at {0}")]
    NotFound(String),
    #[error("keypair already exists at {0}")]
    AlreadyExists(String),
    #[error("corrupt key material: {0}")]
    CorruptKey(String),
    #[error("key generation failed: {0}")]
    GenerationError(String),
    #[error("wait for keypair cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A unit's signing identity.
///
/// The Ed25519 signing key zeroizes itself on drop.
#[derive(Clone)]
pub struct Identity {
    sign_key: SigningKey,
}

impl Identity {
    /// Generate a new identity from OS entropy.
    ///
    /// Entropy failures are reported instead of panicking, which is what
    /// `SigningKey::generate` would do.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        getrandom::getrandom(&mut seed[..])
            .map_err(|e| IdentityError::GenerationError(e.to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Rebuild an identity from its 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            sign_key: SigningKey::from_bytes(seed),
        }
    }

    /// The private seed, for persistence only.
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.sign_key.to_bytes())
    }

    /// Canonical public key encoding.
    pub fn public_key(&self) -> [u8; 32] {
        self.sign_key.verifying_key().to_bytes()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.public_key())
    }

    /// Sign `message` with Ed25519. Returns a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature with strict (non-malleable) checking.
pub fn verify_signature(pub_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(pub_key) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    verifying_key.verify_strict(message, &sig).is_ok()
}
