//! Version 1 wire types.

use serde::{Deserialize, Serialize};

use crate::conversions::{base64_bytes, hex_bytes};

/// Default page size for inbox queries.
pub const DEFAULT_FETCH_LIMIT: u32 = 50;

/// Largest page size the directory will serve.
pub const MAX_FETCH_LIMIT: u32 = 500;

/// Stable address of a unit: hex SHA-256 of its public key.
///
/// Always 64 lowercase hex characters; construction goes through
/// validation so a `Fingerprint` value is well-formed by type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(pub(crate) String);

impl Fingerprint {
    pub const HEX_LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Signed container binding a payload to a claimed sender.
///
/// `sender_fingerprint` is a claim until the envelope has been verified,
/// which is why it is a plain string here rather than a [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeV1 {
    pub sender_fingerprint: String,
    #[serde(with = "hex_bytes")]
    pub sender_public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Signed body of an advertise request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertPayloadV1 {
    /// Free-form capability metadata announced by the unit.
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    /// Unix seconds at which the unit built the advertisement.
    pub timestamp: u64,
}

/// A unit's announced presence as stored by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementV1 {
    pub fingerprint: Fingerprint,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    pub timestamp: u64,
    /// Unix seconds at which the directory accepted this advertisement.
    pub received_at: u64,
}

/// A message accepted into the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageV1 {
    pub id: u64,
    pub sender: Fingerprint,
    /// `None` means the message is broadcast to every inbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Fingerprint>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub received_at: u64,
}

impl MessageV1 {
    /// Whether `reader` may see this message.
    pub fn is_visible_to(&self, reader: &Fingerprint) -> bool {
        match &self.receiver {
            Some(receiver) => receiver == reader,
            None => true,
        }
    }
}

/// Per-reader high-water mark over inbox message ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointV1 {
    pub reader: Fingerprint,
    pub last_id_seen: u64,
}

impl CheckpointV1 {
    pub fn new(reader: Fingerprint) -> Self {
        Self { reader, last_id_seen: 0 }
    }

    /// Checkpoint after consuming `messages`.
    ///
    /// Never moves backwards: an empty batch, or a batch of ids already
    /// below the mark, leaves it unchanged.
    pub fn advanced_by(&self, messages: &[MessageV1]) -> Self {
        let max_seen = messages.iter().map(|m| m.id).max().unwrap_or(0);
        Self {
            reader: self.reader.clone(),
            last_id_seen: self.last_id_seen.max(max_seen),
        }
    }
}

/// Body of `POST /v1/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequestV1 {
    pub envelope: EnvelopeV1,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Fingerprint>,
}

/// Outcome of a directory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatusV1 {
    Accepted,
    Rejected,
    NotFound,
    Error,
}

/// Machine-readable error code carried in every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCodeV1 {
    FingerprintMismatch,
    InvalidSignature,
    NotFound,
    BadRequest,
    PayloadTooLarge,
    StorageError,
}

impl ErrorCodeV1 {
    pub fn status(self) -> ApiStatusV1 {
        match self {
            Self::FingerprintMismatch | Self::InvalidSignature => ApiStatusV1::Rejected,
            Self::NotFound => ApiStatusV1::NotFound,
            Self::BadRequest | Self::PayloadTooLarge | Self::StorageError => ApiStatusV1::Error,
        }
    }
}

/// Error body returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorV1 {
    pub status: ApiStatusV1,
    pub code: ErrorCodeV1,
    pub message: String,
}

impl ApiErrorV1 {
    pub fn new(code: ErrorCodeV1, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code,
            message: message.into(),
        }
    }
}

/// Success body of `POST /v1/units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseResponseV1 {
    pub status: ApiStatusV1,
    pub fingerprint: Fingerprint,
}

/// Success body of `POST /v1/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponseV1 {
    pub status: ApiStatusV1,
    pub id: u64,
}

/// Query string of `GET /v1/inbox/{fingerprint}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSinceQueryV1 {
    #[serde(default)]
    pub since: u64,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_FETCH_LIMIT
}

impl Default for FetchSinceQueryV1 {
    fn default() -> Self {
        Self {
            since: 0,
            limit: DEFAULT_FETCH_LIMIT,
        }
    }
}

/// A page of inbox messages, ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxPageV1 {
    pub messages: Vec<MessageV1>,
}
