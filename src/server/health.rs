//! Liveness endpoint.

use axum::http::StatusCode;

/// Answers 200 "OK" as long as the listener is serving.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
