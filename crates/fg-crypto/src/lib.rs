#![forbid(unsafe_code)]

pub mod hash;
pub mod identity;
pub mod keystore;
pub mod envelope;

pub use envelope::{sign, verify, VerificationError, VerifiedPayload};
pub use hash::fingerprint;
pub use identity::{Identity, IdentityError};
pub use keystore::{FileKeyStore, KeyPaths, KeyStore};

#[cfg(test)]
mod proptests;
