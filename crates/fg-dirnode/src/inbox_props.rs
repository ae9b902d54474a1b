use proptest::prelude::*;

use fg_proto::v1::{CheckpointV1, Fingerprint, MessageV1};

use crate::inbox::{InboxStore, NewMessage};
use crate::store::MemoryStore;

fn fp(byte: u8) -> Fingerprint {
    Fingerprint::from([byte; 32])
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    // Paging with a checkpoint yields exactly the visible messages, in id order,
    // each once, whatever the page size
    #[test]
    fn test_checkpoint_paging_covers_inbox(
        receivers in prop::collection::vec(prop::option::of(0u8..4), 0..40),
        page in 1u32..8,
    ) {
        let reader = fp(0);
        let (visible, paged) = runtime().block_on(async {
            let store = MemoryStore::new();
            for (i, receiver) in receivers.iter().enumerate() {
                store
                    .append(NewMessage {
                        sender: fp(9),
                        receiver: receiver.map(fp),
                        payload: vec![i as u8],
                        received_at: 0,
                    })
                    .await
                    .unwrap();
            }

            let visible = store.fetch_since(&reader, 0, u32::MAX).await.unwrap();

            let mut checkpoint = CheckpointV1::new(reader.clone());
            let mut paged: Vec<MessageV1> = Vec::new();
            loop {
                let batch = store.fetch_since(&reader, checkpoint.last_id_seen, page).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                checkpoint = checkpoint.advanced_by(&batch);
                paged.extend(batch);
            }
            (visible, paged)
        });

        let expected = receivers.iter().filter(|r| matches!(r, None | Some(0))).count();
        prop_assert_eq!(visible.len(), expected);
        prop_assert_eq!(&paged, &visible);
        prop_assert!(paged.windows(2).all(|w| w[0].id < w[1].id));
    }
}
