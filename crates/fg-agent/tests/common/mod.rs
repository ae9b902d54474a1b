//! In-process directory transport for agent tests

use std::sync::Arc;

use async_trait::async_trait;
use fg_agent::{DirectoryTransport, TransportError};
use fg_dirnode::{DirectoryError, DirectoryService};
use fg_proto::v1::{AdvertisementV1, EnvelopeV1, Fingerprint, MessageV1};

/// Calls a [`DirectoryService`] directly, mapping errors the way the HTTP
/// client would see them
pub struct InProcessTransport {
    pub directory: Arc<DirectoryService>,
}

impl InProcessTransport {
    pub fn new(directory: Arc<DirectoryService>) -> Arc<Self> {
        Arc::new(Self { directory })
    }
}

fn map_err(err: DirectoryError) -> TransportError {
    let code = err.code();
    TransportError::from_api(code, err.to_string())
}

#[async_trait]
impl DirectoryTransport for InProcessTransport {
    async fn advertise(&self, envelope: &EnvelopeV1) -> Result<Fingerprint, TransportError> {
        self.directory
            .advertise(envelope)
            .await
            .map(|advert| advert.fingerprint)
            .map_err(map_err)
    }

    async fn submit(
        &self,
        envelope: &EnvelopeV1,
        receiver: Option<&Fingerprint>,
    ) -> Result<u64, TransportError> {
        self.directory
            .submit(envelope, receiver.cloned())
            .await
            .map_err(map_err)
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<AdvertisementV1, TransportError> {
        self.directory.lookup(fingerprint).await.map_err(map_err)
    }

    async fn fetch_since(
        &self,
        reader: &Fingerprint,
        since: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, TransportError> {
        self.directory
            .fetch_since(reader, since, limit)
            .await
            .map_err(map_err)
    }

    async fn fetch_by_id(&self, reader: &Fingerprint, id: u64) -> Result<MessageV1, TransportError> {
        self.directory.fetch_by_id(reader, id).await.map_err(map_err)
    }

    async fn fetch_from_sender(
        &self,
        reader: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, TransportError> {
        self.directory
            .fetch_from_sender(reader, sender)
            .await
            .map_err(map_err)
    }
}
