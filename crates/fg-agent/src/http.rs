//! HTTP directory client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use fg_proto::v1::{
    AdvertiseResponseV1, AdvertisementV1, ApiErrorV1, EnvelopeV1, FetchSinceQueryV1, Fingerprint,
    InboxPageV1, MessageV1, SubmitRequestV1, SubmitResponseV1,
};

use crate::transport::{DirectoryTransport, TransportError};

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpDirectoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decode a success body, or the directory's error body
    async fn read<T: DeserializeOwned>(resp: Response) -> Result<T, TransportError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| TransportError::BadResponse(e.to_string()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        match serde_json::from_slice::<ApiErrorV1>(&body) {
            Ok(err) => Err(TransportError::from_api(err.code, err.message)),
            // Proxies and load balancers answer without our error body
            Err(_) if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => Err(
                TransportError::Unavailable(format!("status={}", status)),
            ),
            Err(_) => Err(TransportError::BadResponse(format!(
                "status={} body={:?}",
                status,
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Self::read(resp).await
    }
}

#[async_trait]
impl DirectoryTransport for HttpDirectoryClient {
    async fn advertise(&self, envelope: &EnvelopeV1) -> Result<Fingerprint, TransportError> {
        let resp = self
            .client
            .post(self.url("/v1/units"))
            .json(envelope)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let body: AdvertiseResponseV1 = Self::read(resp).await?;
        Ok(body.fingerprint)
    }

    async fn submit(
        &self,
        envelope: &EnvelopeV1,
        receiver: Option<&Fingerprint>,
    ) -> Result<u64, TransportError> {
        let request = SubmitRequestV1 {
            envelope: envelope.clone(),
            receiver: receiver.cloned(),
        };
        let resp = self
            .client
            .post(self.url("/v1/messages"))
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let body: SubmitResponseV1 = Self::read(resp).await?;
        Ok(body.id)
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<AdvertisementV1, TransportError> {
        self.get(&format!("/v1/units/{}", fingerprint)).await
    }

    async fn fetch_since(
        &self,
        reader: &Fingerprint,
        since: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, TransportError> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/inbox/{}", reader)))
            .query(&FetchSinceQueryV1 { since, limit })
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let page: InboxPageV1 = Self::read(resp).await?;
        Ok(page.messages)
    }

    async fn fetch_by_id(&self, reader: &Fingerprint, id: u64) -> Result<MessageV1, TransportError> {
        self.get(&format!("/v1/inbox/{}/messages/{}", reader, id)).await
    }

    async fn fetch_from_sender(
        &self,
        reader: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, TransportError> {
        let page: InboxPageV1 = self.get(&format!("/v1/inbox/{}/from/{}", reader, sender)).await?;
        Ok(page.messages)
    }
}
