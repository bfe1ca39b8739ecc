//! Inbound webhook event model.
//!
//! Events are delivered at-least-once and possibly out of order relative to
//! causally related events. The embedded object is kept opaque
//! (`serde_json::Value`); scenario handlers re-retrieve objects from the
//! ledger when the payload cannot be trusted to be complete.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Account id as reported by the platform; optional debug signal only.
    /// The alias in the request path is authoritative.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
    #[serde(default)]
    pub previous_attributes: Option<Value>,
}

impl WebhookEvent {
    /// The embedded object's `id`, if present.
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }

    /// The embedded object's metadata map (may be absent).
    pub fn object_metadata(&self) -> Value {
        self.data
            .object
            .get("metadata")
            .cloned()
            .unwrap_or(Value::Null)
    }
}
