use proptest::prelude::*;

use crate::envelope::{sign, verify, VerificationError};
use crate::hash::fingerprint;
use crate::identity::Identity;

proptest! {
    // verify(sign(I, p)) == (p, fingerprint(I.public))
    #[test]
    fn test_envelope_round_trip(
        seed in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let identity = Identity::from_seed(&seed);
        let verified = verify(&sign(&identity, &payload)).unwrap();
        prop_assert_eq!(verified.payload, payload);
        prop_assert_eq!(verified.sender, fingerprint(&identity.public_key()));
    }

    // Any single bit flip in the payload is detected
    #[test]
    fn test_payload_bit_flip(
        seed in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let identity = Identity::from_seed(&seed);
        let mut env = sign(&identity, &payload);
        let i = index.index(env.payload.len());
        env.payload[i] ^= 1 << bit;
        prop_assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }

    // Any single bit flip in the signature is detected
    #[test]
    fn test_signature_bit_flip(
        seed in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 0..256),
        index in 0usize..64,
        bit in 0u8..8,
    ) {
        let identity = Identity::from_seed(&seed);
        let mut env = sign(&identity, &payload);
        env.signature[index] ^= 1 << bit;
        prop_assert_eq!(verify(&env), Err(VerificationError::InvalidSignature));
    }

    // A different valid key under the original claim is always a mismatch
    #[test]
    fn test_key_substitution(
        seed_a in any::<[u8; 32]>(),
        seed_b in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        prop_assume!(seed_a != seed_b);
        let a = Identity::from_seed(&seed_a);
        let b = Identity::from_seed(&seed_b);
        let mut env = sign(&a, &payload);
        env.sender_public_key = b.public_key().to_vec();
        prop_assert_eq!(verify(&env), Err(VerificationError::FingerprintMismatch));
    }

    // Fingerprinting is a pure function of the key
    #[test]
    fn test_fingerprint_determinism(key in any::<[u8; 32]>()) {
        prop_assert_eq!(fingerprint(&key), fingerprint(&key));
    }
}
