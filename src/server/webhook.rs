//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries, verifies signatures, classifies the
//! payload into evaluation triggers, and enqueues them. The actual
//! evaluations happen asynchronously in per-installation workers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::controller::workers::enqueue_events;
use crate::queue::StoreError;
use crate::webhooks::ingest::IngestError;
use crate::webhooks::{resolve_events, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Signature did not match the payload.
    #[error("invalid signature")]
    InvalidSignature,

    /// Payload was not the JSON shape we expect for this event type.
    #[error("invalid payload: {0}")]
    InvalidPayload(serde_json::Error),

    /// A PR lookup against GitHub failed while classifying the event.
    #[error("lookup failed: {0}")]
    Lookup(crate::github::GitHubApiError),

    /// The queue store rejected the enqueue.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<IngestError> for WebhookError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::InvalidPayload(e) => WebhookError::InvalidPayload(e),
            IngestError::Lookup(e) => WebhookError::Lookup(e),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_)
            | WebhookError::InvalidSignature
            | WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Lookup(_) => StatusCode::BAD_GATEWAY,
            WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: event type (e.g. "pull_request", "status")
///   - `X-Hub-Signature`: HMAC-SHA1 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: events classified and enqueued (possibly zero of them)
/// - 400 Bad Request: missing header, bad signature, or malformed payload
/// - 502 Bad Gateway: GitHub lookup failed during classification
/// - 500 Internal Server Error: queue store failure
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;

    // Verify the signature before parsing anything.
    if !verify_signature(&body, &signature_header, app_state.webhook_secret()) {
        warn!(event_type = %event_type, "invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let events = resolve_events(
        &event_type,
        &body,
        Some(app_state.app_id()),
        app_state.client().as_ref(),
    )
    .await?;

    debug!(
        event_type = %event_type,
        triggers = events.len(),
        "classified webhook delivery"
    );

    enqueue_events(app_state.ctx(), events).await?;
    Ok((StatusCode::OK, "OK"))
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
