//! HTTP API endpoints

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tracing::error;

use fg_proto::v1::{
    AdvertiseResponseV1, ApiErrorV1, ApiStatusV1, EnvelopeV1, ErrorCodeV1, FetchSinceQueryV1,
    Fingerprint, InboxPageV1, SubmitRequestV1, SubmitResponseV1,
};

use crate::directory::{DirectoryError, DirectoryLimits, DirectoryService};

/// Room for the envelope around a payload: keys, signature, field names
const ENVELOPE_OVERHEAD: usize = 4 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub directory: Arc<DirectoryService>,
}

/// Largest request body accepted for `limits`.
///
/// Payload bytes are at most doubled by their text encoding.
pub fn body_limit(limits: DirectoryLimits) -> usize {
    limits.max_payload_size.saturating_mul(2).saturating_add(ENVELOPE_OVERHEAD)
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let limit = body_limit(state.directory.limits());
    Router::new()
        .route("/v1/units", post(post_unit))
        .route("/v1/units/:fingerprint", get(get_unit))
        .route("/v1/messages", post(post_message))
        .route("/v1/inbox/:fingerprint", get(get_inbox))
        .route("/v1/inbox/:fingerprint/messages/:id", get(get_inbox_message))
        .route("/v1/inbox/:fingerprint/from/:sender", get(get_inbox_from))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match code {
            ErrorCodeV1::FingerprintMismatch | ErrorCodeV1::InvalidSignature => StatusCode::FORBIDDEN,
            ErrorCodeV1::NotFound => StatusCode::NOT_FOUND,
            ErrorCodeV1::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCodeV1::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCodeV1::StorageError => {
                error!("Storage error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // Storage details stay in the server log
        let message = match &self {
            DirectoryError::Storage(_) => "storage unavailable".to_string(),
            other => other.to_string(),
        };
        (status, Json(ApiErrorV1::new(code, message))).into_response()
    }
}

/// Turn a body rejection into the directory's error body
fn read_body(body: Result<Bytes, BytesRejection>, limits: DirectoryLimits) -> Result<Bytes, DirectoryError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            DirectoryError::BodyTooLarge { max: body_limit(limits) }
        } else {
            DirectoryError::BadRequest(rejection.body_text())
        }
    })
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, DirectoryError> {
    serde_json::from_slice(body).map_err(|e| DirectoryError::BadRequest(format!("invalid request body: {}", e)))
}

fn parse_fingerprint(raw: &str) -> Result<Fingerprint, DirectoryError> {
    raw.parse()
        .map_err(|e| DirectoryError::BadRequest(format!("invalid fingerprint: {}", e)))
}

/// POST /v1/units - Advertise a unit
async fn post_unit(
    State(state): State<ApiState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<AdvertiseResponseV1>, DirectoryError> {
    let body = read_body(body, state.directory.limits())?;
    let envelope: EnvelopeV1 = parse_json(&body)?;
    let advert = state.directory.advertise(&envelope).await?;
    Ok(Json(AdvertiseResponseV1 {
        status: ApiStatusV1::Accepted,
        fingerprint: advert.fingerprint,
    }))
}

/// GET /v1/units/{fingerprint} - Look up an advertisement
async fn get_unit(
    State(state): State<ApiState>,
    Path(fingerprint): Path<String>,
) -> Result<Response, DirectoryError> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let advert = state.directory.lookup(&fingerprint).await?;
    Ok(Json(advert).into_response())
}

/// POST /v1/messages - Submit a signed message
async fn post_message(
    State(state): State<ApiState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<SubmitResponseV1>), DirectoryError> {
    let body = read_body(body, state.directory.limits())?;
    let request: SubmitRequestV1 = parse_json(&body)?;
    let id = state.directory.submit(&request.envelope, request.receiver).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponseV1 {
            status: ApiStatusV1::Accepted,
            id,
        }),
    ))
}

/// GET /v1/inbox/{fingerprint}?since=&limit= - Messages after a checkpoint
async fn get_inbox(
    State(state): State<ApiState>,
    Path(fingerprint): Path<String>,
    query: Result<Query<FetchSinceQueryV1>, QueryRejection>,
) -> Result<Json<InboxPageV1>, DirectoryError> {
    let reader = parse_fingerprint(&fingerprint)?;
    let Query(query) = query.map_err(|e| DirectoryError::BadRequest(e.body_text()))?;
    let messages = state.directory.fetch_since(&reader, query.since, query.limit).await?;
    Ok(Json(InboxPageV1 { messages }))
}

/// GET /v1/inbox/{fingerprint}/messages/{id} - A single message
async fn get_inbox_message(
    State(state): State<ApiState>,
    Path((fingerprint, id)): Path<(String, String)>,
) -> Result<Response, DirectoryError> {
    let reader = parse_fingerprint(&fingerprint)?;
    let id: u64 = id
        .parse()
        .map_err(|_| DirectoryError::BadRequest(format!("invalid message id: {}", id)))?;
    let message = state.directory.fetch_by_id(&reader, id).await?;
    Ok(Json(message).into_response())
}

/// GET /v1/inbox/{fingerprint}/from/{sender} - Messages from one sender
async fn get_inbox_from(
    State(state): State<ApiState>,
    Path((fingerprint, sender)): Path<(String, String)>,
) -> Result<Json<InboxPageV1>, DirectoryError> {
    let reader = parse_fingerprint(&fingerprint)?;
    let sender = parse_fingerprint(&sender)?;
    let messages = state.directory.fetch_from_sender(&reader, &sender).await?;
    Ok(Json(InboxPageV1 { messages }))
}

/// GET /health - Health check
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
