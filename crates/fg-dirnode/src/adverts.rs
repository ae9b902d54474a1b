//! Unit advertisements: storage contract and conflict policy

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use fg_proto::v1::{AdvertisementV1, Fingerprint};

use crate::store::StoreError;

/// How a new advertisement replaces the stored one for the same unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdvertPolicy {
    /// Last write wins by arrival order at this directory.
    #[default]
    ArrivalOrder,
    /// Last write wins by the unit's own advertised timestamp; an older
    /// advertisement arriving late is accepted but does not replace.
    NewestTimestamp,
}

impl FromStr for AdvertPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrival_order" => Ok(Self::ArrivalOrder),
            "newest_timestamp" => Ok(Self::NewestTimestamp),
            other => Err(format!(
                "advert_policy must be one of: arrival_order, newest_timestamp (got {other})"
            )),
        }
    }
}

/// Persistence for advertisements, keyed by fingerprint.
#[async_trait]
pub trait AdvertStore: Send + Sync {
    /// Insert or replace under `policy`. Returns whether the stored record
    /// now reflects `advert`.
    async fn upsert_advert(
        &self,
        advert: &AdvertisementV1,
        policy: AdvertPolicy,
    ) -> Result<bool, StoreError>;

    async fn load_advert(&self, fingerprint: &Fingerprint)
        -> Result<Option<AdvertisementV1>, StoreError>;
}

/// Advertisement registry
pub struct AdvertRegistry {
    store: Arc<dyn AdvertStore>,
    policy: AdvertPolicy,
}

impl AdvertRegistry {
    pub fn new(store: Arc<dyn AdvertStore>, policy: AdvertPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> AdvertPolicy {
        self.policy
    }

    /// Store an already-verified advertisement.
    pub async fn upsert(&self, advert: &AdvertisementV1) -> Result<bool, StoreError> {
        self.store.upsert_advert(advert, self.policy).await
    }

    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<AdvertisementV1>, StoreError> {
        self.store.load_advert(fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn advert(byte: u8, timestamp: u64, name: &str) -> AdvertisementV1 {
        let mut capabilities = serde_json::Map::new();
        capabilities.insert("name".into(), name.into());
        AdvertisementV1 {
            fingerprint: Fingerprint::from([byte; 32]),
            public_key: vec![byte; 32],
            capabilities,
            timestamp,
            received_at: timestamp,
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("arrival_order".parse(), Ok(AdvertPolicy::ArrivalOrder));
        assert_eq!("newest_timestamp".parse(), Ok(AdvertPolicy::NewestTimestamp));
        assert!("vector_clock".parse::<AdvertPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_arrival_order_replaces_with_older_timestamp() {
        let registry = AdvertRegistry::new(Arc::new(MemoryStore::new()), AdvertPolicy::ArrivalOrder);
        assert!(registry.upsert(&advert(1, 200, "new")).await.unwrap());
        assert!(registry.upsert(&advert(1, 100, "late")).await.unwrap());

        let stored = registry.lookup(&Fingerprint::from([1; 32])).await.unwrap().unwrap();
        assert_eq!(stored.capabilities["name"], "late");
    }

    #[tokio::test]
    async fn test_newest_timestamp_ignores_stale() {
        let registry = AdvertRegistry::new(Arc::new(MemoryStore::new()), AdvertPolicy::NewestTimestamp);
        assert!(registry.upsert(&advert(1, 200, "new")).await.unwrap());
        assert!(!registry.upsert(&advert(1, 100, "late")).await.unwrap());

        let stored = registry.lookup(&Fingerprint::from([1; 32])).await.unwrap().unwrap();
        assert_eq!(stored.capabilities["name"], "new");
    }
}
