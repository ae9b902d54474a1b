//! Directory transport contract

use async_trait::async_trait;
use thiserror::Error;

use fg_proto::v1::{AdvertisementV1, EnvelopeV1, ErrorCodeV1, Fingerprint, MessageV1};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Directory unreachable, timed out or failing internally
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    /// Envelope failed verification at the directory
    #[error("rejected by directory ({code:?}): {message}")]
    Rejected { code: ErrorCodeV1, message: String },
    #[error("not found")]
    NotFound,
    /// Request refused for a reason other than verification
    #[error("request refused ({code:?}): {message}")]
    Refused { code: ErrorCodeV1, message: String },
    #[error("bad response: {0}")]
    BadResponse(String),
}

impl TransportError {
    /// Map a directory error body to a transport error
    pub fn from_api(code: ErrorCodeV1, message: String) -> Self {
        match code {
            ErrorCodeV1::FingerprintMismatch | ErrorCodeV1::InvalidSignature => {
                Self::Rejected { code, message }
            }
            ErrorCodeV1::NotFound => Self::NotFound,
            ErrorCodeV1::StorageError => Self::Unavailable(message),
            ErrorCodeV1::BadRequest | ErrorCodeV1::PayloadTooLarge => Self::Refused { code, message },
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Operations a peer performs against a directory.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    /// Submit a signed advertisement. Returns the fingerprint the directory stored it under.
    async fn advertise(&self, envelope: &EnvelopeV1) -> Result<Fingerprint, TransportError>;

    /// Submit a signed message. Returns the assigned message id.
    async fn submit(
        &self,
        envelope: &EnvelopeV1,
        receiver: Option<&Fingerprint>,
    ) -> Result<u64, TransportError>;

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<AdvertisementV1, TransportError>;

    async fn fetch_since(
        &self,
        reader: &Fingerprint,
        since: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, TransportError>;

    async fn fetch_by_id(&self, reader: &Fingerprint, id: u64) -> Result<MessageV1, TransportError>;

    async fn fetch_from_sender(
        &self,
        reader: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, TransportError>;
}
