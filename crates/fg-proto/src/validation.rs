//! Validation helpers for fieldgrid wire messages.
//!
//! Shape checks only: lengths, encodings and size limits. Cryptographic
//! checks (fingerprint derivation, signatures) belong to `fg-crypto`.

use crate::v1::{EnvelopeV1, Fingerprint};

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Largest payload the directory accepts inside a single envelope.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Validation error types for wire messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field has invalid size (expected, actual)
    InvalidSize { field: &'static str, expected: usize, actual: usize },
    /// Field exceeds its maximum size
    TooLarge { field: &'static str, max: usize, actual: usize },
    /// Field is not lowercase hexadecimal
    InvalidHex { field: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSize { field, expected, actual } => {
                write!(f, "field '{}' has invalid size: expected {}, got {}", field, expected, actual)
            }
            Self::TooLarge { field, max, actual } => {
                write!(f, "field '{}' is {} bytes, maximum is {}", field, actual, max)
            }
            Self::InvalidHex { field } => {
                write!(f, "field '{}' is not lowercase hex", field)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check that `s` is a well-formed fingerprint: 64 lowercase hex characters.
pub fn validate_fingerprint(s: &str) -> Result<(), ValidationError> {
    if s.len() != Fingerprint::HEX_LEN {
        return Err(ValidationError::InvalidSize {
            field: "fingerprint",
            expected: Fingerprint::HEX_LEN,
            actual: s.len(),
        });
    }
    if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(ValidationError::InvalidHex { field: "fingerprint" });
    }
    Ok(())
}

impl EnvelopeV1 {
    /// Reject envelopes whose payload is larger than `max_payload`.
    ///
    /// Key and signature lengths are left to the verifier so that a malformed
    /// key surfaces as a fingerprint mismatch and a malformed signature as an
    /// invalid signature.
    pub fn validate_size(&self, max_payload: usize) -> Result<(), ValidationError> {
        if self.payload.len() > max_payload {
            return Err(ValidationError::TooLarge {
                field: "payload",
                max: max_payload,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }
}
