//! HTTP surface: webhook intake, admin config endpoints, monitoring stream.

pub mod config;
pub mod monitor;
pub mod signature;
pub mod webhook;

use std::sync::Arc;

use axum::Json;
use serde_json::{json, Value};

use crate::config::ConfigStore;
use crate::ledger::LedgerClientFactory;
use crate::monitor::WebhookHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub clients: Arc<dyn LedgerClientFactory>,
    pub hub: Arc<WebhookHub>,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
