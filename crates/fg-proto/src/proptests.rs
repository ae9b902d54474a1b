use proptest::prelude::*;

use crate::v1::{CheckpointV1, EnvelopeV1, Fingerprint, MessageV1};

fn message(id: u64) -> MessageV1 {
    MessageV1 {
        id,
        sender: Fingerprint::from([9u8; 32]),
        receiver: None,
        payload: Vec::new(),
        received_at: 0,
    }
}

proptest! {
    // Any 32-byte digest renders to a fingerprint that parses back unchanged
    #[test]
    fn test_fingerprint_from_digest_parses(digest in any::<[u8; 32]>()) {
        let fp = Fingerprint::from(digest);
        let parsed: Fingerprint = fp.as_str().parse().unwrap();
        prop_assert_eq!(parsed, fp);
    }

    // Checkpoints never move backwards, whatever batch they see
    #[test]
    fn test_checkpoint_monotonic(
        start in 0u64..1_000,
        ids in prop::collection::vec(0u64..2_000, 0..20),
    ) {
        let cp = CheckpointV1 { reader: Fingerprint::from([1u8; 32]), last_id_seen: start };
        let batch: Vec<MessageV1> = ids.iter().copied().map(message).collect();
        let next = cp.advanced_by(&batch);
        prop_assert!(next.last_id_seen >= cp.last_id_seen);
        for id in ids {
            prop_assert!(next.last_id_seen >= id);
        }
    }

    // Envelope JSON carries arbitrary binary payloads intact
    #[test]
    fn test_envelope_payload_survives_json(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let env = EnvelopeV1 {
            sender_fingerprint: "00".repeat(32),
            sender_public_key: vec![1u8; 32],
            payload: payload.clone(),
            signature: vec![2u8; 64],
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: EnvelopeV1 = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.payload, payload);
    }
}
