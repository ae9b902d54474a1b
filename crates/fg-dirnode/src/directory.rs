//! Directory service: verification, advertisement upserts and inbox routing
//!
//! Every write goes `received -> verifying -> accepted | rejected`. Nothing
//! is stored for a rejected envelope, and the authenticated sender always
//! comes from the verifier, never from the claim inside the envelope.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use fg_crypto::{verify, VerificationError, VerifiedPayload};
use fg_proto::v1::{
    AdvertPayloadV1, AdvertisementV1, EnvelopeV1, ErrorCodeV1, Fingerprint, MessageV1,
    MAX_FETCH_LIMIT,
};
use fg_proto::validation::{ValidationError, MAX_PAYLOAD_SIZE};

use crate::adverts::{AdvertPolicy, AdvertRegistry, AdvertStore};
use crate::inbox::{InboxStore, NewMessage};
use crate::store::{MemoryStore, StoreError};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Envelope rejected: {0}")]
    Rejected(#[from] VerificationError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(ValidationError),
    #[error("Request body exceeds {max} bytes")]
    BodyTooLarge { max: usize },
    #[error("Not found")]
    NotFound,
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl DirectoryError {
    /// Wire error code for this failure
    pub fn code(&self) -> ErrorCodeV1 {
        match self {
            Self::Rejected(VerificationError::FingerprintMismatch) => ErrorCodeV1::FingerprintMismatch,
            Self::Rejected(VerificationError::InvalidSignature) => ErrorCodeV1::InvalidSignature,
            Self::BadRequest(_) => ErrorCodeV1::BadRequest,
            Self::PayloadTooLarge(_) | Self::BodyTooLarge { .. } => ErrorCodeV1::PayloadTooLarge,
            Self::NotFound => ErrorCodeV1::NotFound,
            Self::Storage(_) => ErrorCodeV1::StorageError,
        }
    }
}

/// Request limits enforced by the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLimits {
    pub max_payload_size: usize,
    pub max_fetch_limit: u32,
}

impl Default for DirectoryLimits {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_fetch_limit: MAX_FETCH_LIMIT,
        }
    }
}

/// Directory service
pub struct DirectoryService {
    adverts: AdvertRegistry,
    inbox: Arc<dyn InboxStore>,
    limits: DirectoryLimits,
}

impl DirectoryService {
    pub fn new(
        adverts: Arc<dyn AdvertStore>,
        inbox: Arc<dyn InboxStore>,
        policy: AdvertPolicy,
        limits: DirectoryLimits,
    ) -> Self {
        Self {
            adverts: AdvertRegistry::new(adverts, policy),
            inbox,
            limits,
        }
    }

    /// Non-durable directory over a [`MemoryStore`]
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, AdvertPolicy::default(), DirectoryLimits::default())
    }

    pub fn limits(&self) -> DirectoryLimits {
        self.limits
    }

    fn verify_envelope(&self, op: &'static str, envelope: &EnvelopeV1) -> Result<VerifiedPayload, DirectoryError> {
        debug!(op, claimed = %envelope.sender_fingerprint, stage = "received", "envelope received");

        envelope
            .validate_size(self.limits.max_payload_size)
            .map_err(DirectoryError::PayloadTooLarge)?;

        debug!(op, claimed = %envelope.sender_fingerprint, stage = "verifying", "verifying envelope");
        verify(envelope).map_err(|e| {
            warn!(op, claimed = %envelope.sender_fingerprint, stage = "rejected", "envelope rejected: {}", e);
            DirectoryError::from(e)
        })
    }

    /// Verify and store a unit advertisement.
    pub async fn advertise(&self, envelope: &EnvelopeV1) -> Result<AdvertisementV1, DirectoryError> {
        let verified = self.verify_envelope("advertise", envelope)?;

        let payload: AdvertPayloadV1 = serde_json::from_slice(&verified.payload)
            .map_err(|e| DirectoryError::BadRequest(format!("invalid advertisement payload: {}", e)))?;

        let advert = AdvertisementV1 {
            fingerprint: verified.sender,
            public_key: verified.public_key.to_vec(),
            capabilities: payload.capabilities,
            timestamp: payload.timestamp,
            received_at: unix_now(),
        };

        let replaced = self.adverts.upsert(&advert).await.map_err(|e| {
            error!(op = "advertise", fingerprint = %advert.fingerprint, "store failed: {}", e);
            DirectoryError::from(e)
        })?;

        info!(
            op = "advertise",
            fingerprint = %advert.fingerprint,
            stage = "accepted",
            replaced,
            "advertisement accepted"
        );
        Ok(advert)
    }

    /// Verify an envelope and append it to the inbox. Returns the new message id.
    pub async fn submit(
        &self,
        envelope: &EnvelopeV1,
        receiver: Option<Fingerprint>,
    ) -> Result<u64, DirectoryError> {
        let verified = self.verify_envelope("submit", envelope)?;
        let sender = verified.sender;

        let message = NewMessage {
            sender: sender.clone(),
            receiver: receiver.clone(),
            payload: verified.payload,
            received_at: unix_now(),
        };

        let id = self.inbox.append(message).await.map_err(|e| {
            error!(op = "submit", sender = %sender, "append failed: {}", e);
            DirectoryError::from(e)
        })?;

        info!(
            op = "submit",
            id,
            sender = %sender,
            receiver = receiver.as_ref().map(|r| r.as_str()).unwrap_or("*"),
            stage = "accepted",
            "message accepted"
        );
        Ok(id)
    }

    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<AdvertisementV1, DirectoryError> {
        self.adverts
            .lookup(fingerprint)
            .await?
            .ok_or(DirectoryError::NotFound)
    }

    /// A single message, only if `reader` may see it.
    pub async fn fetch_by_id(&self, reader: &Fingerprint, id: u64) -> Result<MessageV1, DirectoryError> {
        match self.inbox.fetch_by_id(id).await? {
            Some(message) if message.is_visible_to(reader) => Ok(message),
            _ => Err(DirectoryError::NotFound),
        }
    }

    /// Messages after `since` for `reader`. `limit` is clamped to `1..=max_fetch_limit`.
    pub async fn fetch_since(
        &self,
        reader: &Fingerprint,
        since: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, DirectoryError> {
        let limit = limit.min(self.limits.max_fetch_limit).max(1);
        Ok(self.inbox.fetch_since(reader, since, limit).await?)
    }

    pub async fn fetch_from_sender(
        &self,
        reader: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, DirectoryError> {
        Ok(self.inbox.fetch_from_sender(reader, sender).await?)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use fg_crypto::{sign, Identity};

    fn identity(byte: u8) -> Identity {
        Identity::from_seed(&[byte; 32])
    }

    fn advert_envelope(id: &Identity, name: &str, timestamp: u64) -> EnvelopeV1 {
        let mut capabilities = serde_json::Map::new();
        capabilities.insert("name".into(), name.into());
        let payload = AdvertPayloadV1 { capabilities, timestamp };
        sign(id, &serde_json::to_vec(&payload).unwrap())
    }

    #[tokio::test]
    async fn test_advertise_then_lookup() {
        let dir = DirectoryService::in_memory();
        let unit = identity(1);

        let stored = dir.advertise(&advert_envelope(&unit, "alpha", 10)).await.unwrap();
        assert_eq!(stored.fingerprint, unit.fingerprint());

        let found = dir.lookup(&unit.fingerprint()).await.unwrap();
        assert_eq!(found.capabilities["name"], "alpha");
        assert_eq!(found.public_key, unit.public_key().to_vec());
    }

    #[tokio::test]
    async fn test_advertise_replaces_previous() {
        let dir = DirectoryService::in_memory();
        let unit = identity(1);

        dir.advertise(&advert_envelope(&unit, "alpha", 10)).await.unwrap();
        dir.advertise(&advert_envelope(&unit, "beta", 11)).await.unwrap();

        let found = dir.lookup(&unit.fingerprint()).await.unwrap();
        assert_eq!(found.capabilities["name"], "beta");
    }

    #[tokio::test]
    async fn test_rejected_advertise_stores_nothing() {
        let dir = DirectoryService::in_memory();
        let unit = identity(1);
        let mut env = advert_envelope(&unit, "alpha", 10);
        env.signature[0] ^= 0x01;

        let err = dir.advertise(&env).await.unwrap_err();
        assert_eq!(err.code(), ErrorCodeV1::InvalidSignature);
        assert!(matches!(dir.lookup(&unit.fingerprint()).await, Err(DirectoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_impersonation_rejected() {
        let dir = DirectoryService::in_memory();
        let victim = identity(1);
        let attacker = identity(2);

        let mut env = advert_envelope(&attacker, "evil", 10);
        env.sender_fingerprint = victim.fingerprint().to_string();

        let err = dir.advertise(&env).await.unwrap_err();
        assert_eq!(err.code(), ErrorCodeV1::FingerprintMismatch);
        assert!(dir.lookup(&victim.fingerprint()).await.is_err());
    }

    #[tokio::test]
    async fn test_advertise_requires_advert_payload() {
        let dir = DirectoryService::in_memory();
        let env = sign(&identity(1), b"not json");
        let err = dir.advertise(&env).await.unwrap_err();
        assert_eq!(err.code(), ErrorCodeV1::BadRequest);
    }

    #[tokio::test]
    async fn test_submit_then_fetch_since() {
        let dir = DirectoryService::in_memory();
        let alice = identity(1);
        let bob = identity(2);

        let id = dir
            .submit(&sign(&alice, b"hello bob"), Some(bob.fingerprint()))
            .await
            .unwrap();

        let page = dir.fetch_since(&bob.fingerprint(), 0, 50).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, id);
        assert_eq!(page[0].sender, alice.fingerprint());
        assert_eq!(page[0].payload, b"hello bob");

        assert!(dir.fetch_since(&bob.fingerprint(), id, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_tampered_payload() {
        let dir = DirectoryService::in_memory();
        let mut env = sign(&identity(1), b"hello");
        env.payload[0] ^= 0x80;

        let err = dir.submit(&env, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCodeV1::InvalidSignature);
        assert!(dir.fetch_since(&identity(2).fingerprint(), 0, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_payload_too_large() {
        let store = Arc::new(MemoryStore::new());
        let dir = DirectoryService::new(
            store.clone(),
            store,
            AdvertPolicy::ArrivalOrder,
            DirectoryLimits {
                max_payload_size: 8,
                max_fetch_limit: 10,
            },
        );
        let err = dir.submit(&sign(&identity(1), b"123456789"), None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCodeV1::PayloadTooLarge);
    }

    #[tokio::test]
    async fn test_fetch_by_id_checks_visibility() {
        let dir = DirectoryService::in_memory();
        let alice = identity(1);
        let bob = identity(2);
        let carol = identity(3);

        let private = dir.submit(&sign(&alice, b"for bob"), Some(bob.fingerprint())).await.unwrap();
        let broadcast = dir.submit(&sign(&alice, b"for all"), None).await.unwrap();

        assert!(dir.fetch_by_id(&bob.fingerprint(), private).await.is_ok());
        assert!(matches!(
            dir.fetch_by_id(&carol.fingerprint(), private).await,
            Err(DirectoryError::NotFound)
        ));
        assert!(dir.fetch_by_id(&carol.fingerprint(), broadcast).await.is_ok());
        assert!(dir.fetch_by_id(&bob.fingerprint(), broadcast + 1).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_limit_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let dir = DirectoryService::new(
            store.clone(),
            store,
            AdvertPolicy::ArrivalOrder,
            DirectoryLimits {
                max_payload_size: 1024,
                max_fetch_limit: 3,
            },
        );
        let alice = identity(1);
        for i in 0..5u8 {
            dir.submit(&sign(&alice, &[i]), None).await.unwrap();
        }
        let reader = identity(2).fingerprint();
        assert_eq!(dir.fetch_since(&reader, 0, 100).await.unwrap().len(), 3);
        assert_eq!(dir.fetch_since(&reader, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_from_sender() {
        let dir = DirectoryService::in_memory();
        let alice = identity(1);
        let bob = identity(2);
        let carol = identity(3);

        dir.submit(&sign(&alice, b"a1"), Some(bob.fingerprint())).await.unwrap();
        dir.submit(&sign(&carol, b"c1"), Some(bob.fingerprint())).await.unwrap();
        dir.submit(&sign(&alice, b"a2"), Some(bob.fingerprint())).await.unwrap();

        let from_alice = dir.fetch_from_sender(&bob.fingerprint(), &alice.fingerprint()).await.unwrap();
        let bodies: Vec<&[u8]> = from_alice.iter().map(|m| m.payload.as_slice()).collect();
        assert_eq!(bodies, vec![b"a1".as_slice(), b"a2".as_slice()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_get_unique_ids() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let dir = Arc::new(DirectoryService::new(
            store.clone(),
            store,
            AdvertPolicy::ArrivalOrder,
            DirectoryLimits::default(),
        ));
        let receiver = identity(99).fingerprint();

        let mut handles = Vec::new();
        for i in 0..32u8 {
            let dir = dir.clone();
            let receiver = receiver.clone();
            handles.push(tokio::spawn(async move {
                let sender = identity(i);
                dir.submit(&sign(&sender, &[i]), Some(receiver)).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);

        let page = dir.fetch_since(&receiver, 0, 100).await.unwrap();
        assert_eq!(page.len(), 32);
        assert!(page.windows(2).all(|w| w[0].id < w[1].id));
    }
}
