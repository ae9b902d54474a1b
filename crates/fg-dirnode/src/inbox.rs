//! Inbox storage contract.
//!
//! Append-only: messages are never mutated or removed, and reads never
//! change them. Read progress is tracked by each reader's checkpoint.

use async_trait::async_trait;
use fg_proto::v1::{Fingerprint, MessageV1};

use crate::store::StoreError;

/// A message accepted by the directory, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: Fingerprint,
    pub receiver: Option<Fingerprint>,
    pub payload: Vec<u8>,
    pub received_at: u64,
}

impl NewMessage {
    pub fn with_id(self, id: u64) -> MessageV1 {
        MessageV1 {
            id,
            sender: self.sender,
            receiver: self.receiver,
            payload: self.payload,
            received_at: self.received_at,
        }
    }
}

/// Durable mailbox keyed by recipient fingerprint.
///
/// Implementations assign ids from a single ordering point: ids are unique,
/// strictly increasing in append order and never reused. `append` returns
/// only after the message is durable.
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<u64, StoreError>;

    async fn fetch_by_id(&self, id: u64) -> Result<Option<MessageV1>, StoreError>;

    /// Messages with id > `last_id` addressed to `receiver` or broadcast,
    /// ascending by id, at most `limit`.
    async fn fetch_since(
        &self,
        receiver: &Fingerprint,
        last_id: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, StoreError>;

    /// Messages from `sender` visible to `receiver`, ascending by id.
    async fn fetch_from_sender(
        &self,
        receiver: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, StoreError>;
}
