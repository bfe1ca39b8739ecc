//! In-memory fan-out of accepted webhook events for the live monitoring
//! stream. Lossy by construction: a lagging SSE subscriber drops messages,
//! publishing never blocks webhook handling, and nothing feeds back into
//! orchestration.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub received_at: String,
    pub alias: String,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
}

impl MonitorEvent {
    pub fn now(
        alias: impl Into<String>,
        account_id: impl Into<String>,
        country: Option<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            received_at: Utc::now().to_rfc3339(),
            alias: alias.into(),
            account_id: account_id.into(),
            country,
            event_type: event_type.into(),
        }
    }
}

pub struct WebhookHub {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for WebhookHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Best-effort publish. An error only means there is no subscriber.
    pub fn publish(&self, event: MonitorEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("no monitor subscribers: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}
