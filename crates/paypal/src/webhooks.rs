//! Webhook payload parsing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// PayPal webhook event envelope.
///
/// Only `id` is required; the `resource` body differs per event type and is
/// kept as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_version: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub resource_type: Option<String>,
    pub event_type: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub resource: Value,
}

impl WebhookEvent {
    /// Parse a webhook event from the raw body
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let event: WebhookEvent = serde_json::from_slice(body)?;
        debug!("Parsed webhook event {} ({})", event.id, event.event_type());
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or("unknown")
    }
}
