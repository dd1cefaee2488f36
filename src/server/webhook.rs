//! Webhook endpoint handler.
//!
//! Reads the event type and delivery id headers and hands the body to the
//! dispatcher. Handlers run in the background, so the response only says
//! whether the delivery was accepted, not how handling went.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info_span, warn};

use super::AppState;
use crate::dispatch::{DispatchError, DispatchOutcome};
use crate::types::EventId;

/// Header carrying the event type tag.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header carrying the unique delivery id.
pub const HEADER_DELIVERY: &str = "x-github-delivery";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The payload could not be decoded or is structurally invalid.
    #[error("{0}")]
    Rejected(#[from] DispatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// - 202 Accepted: a handler was started, or the event type has no handler
/// - 400 Bad Request: a header is missing or the payload was refused
///
/// ```ignore
/// POST /webhook HTTP/1.1
/// X-GitHub-Event: issue_comment
/// X-GitHub-Delivery: 550e8400-e29b-41d4-a716-446655440000
/// Content-Type: application/json
///
/// {"action": "created", "comment": {...}, "issue": {...}, "repository": {...}}
///
/// HTTP/1.1 202 Accepted
/// ```
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let event_id = EventId::new(get_header(&headers, HEADER_DELIVERY)?);

    let span = info_span!("webhook", event_type = %event_type, event_id = %event_id);
    debug!(parent: &span, body_len = body.len(), "Received webhook");

    match app_state.dispatcher().dispatch(&event_type, &body, &span) {
        Ok(DispatchOutcome::Spawned) => Ok((StatusCode::ACCEPTED, "Accepted")),
        Ok(DispatchOutcome::Ignored) => Ok((StatusCode::ACCEPTED, "Accepted (ignored)")),
        Err(e) => {
            warn!(parent: &span, error = %e, "Rejected webhook payload");
            Err(WebhookError::Rejected(e))
        }
    }
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
