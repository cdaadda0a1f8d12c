//! API routes

pub mod health;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::state::AppState;

/// Build the router: the webhook route at the configured path plus `/health`
pub fn router(state: Arc<AppState>) -> Router {
    let listen_path = state.config.listen_path.clone();
    Router::new()
        .route("/health", get(health::health))
        .route(&listen_path, post(webhooks::receive))
        .with_state(state)
}
