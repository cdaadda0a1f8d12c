//! Webhook routes

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use paypal::WebhookEvent;

#[derive(Serialize)]
pub struct WebhookResponse {
    ok: bool,
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    debug!("Headers: {:?}", headers);
    debug!("Raw payload: {}", String::from_utf8_lossy(&body));

    // Verify against the exact bytes received, before parsing
    state.verifier.check(&body, &headers).await?;

    let event = WebhookEvent::parse(&body)
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse webhook: {}", e)))?;

    info!(
        "✔️ Signature valid, processing event {} ({})",
        event.id,
        event.event_type()
    );

    Ok(Json(WebhookResponse { ok: true }))
}
