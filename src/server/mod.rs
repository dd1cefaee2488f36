//! HTTP server for the bot.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts webhook deliveries of up to 25 MB (returns 202 Accepted)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use crate::dispatch::Dispatch;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::webhook_handler;

/// Largest webhook body accepted. GitHub caps deliveries at 25 MB.
pub const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<dyn Dispatch>,
}

impl AppState {
    pub fn new(dispatcher: Arc<dyn Dispatch>) -> Self {
        AppState { dispatcher }
    }

    pub fn dispatcher(&self) -> &dyn Dispatch {
        self.dispatcher.as_ref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::extract::DefaultBodyLimit;
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/webhook",
            post(webhook_handler).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY)),
        )
        .route("/health", get(health_handler))
        .with_state(app_state)
}
