use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    api::AppState,
    config::ConfigStore,
    error::AppResult,
    ledger::{HttpLedgerFactory, LedgerClientFactory},
    monitor::WebhookHub,
};

const DEFAULT_CONFIG_PATH: &str = "config/runtime-config.json";

pub fn initialize_app_state() -> AppResult<AppState> {
    info!("Initializing application components ...");

    let config_path = std::env::var("RUNTIME_CONFIG_PATH")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Arc::new(ConfigStore::new(&config_path));

    // Fail fast on unreadable config; an empty account set is survivable
    // (accounts can be added through the admin API).
    let snapshot = config.snapshot()?;
    info!(
        "✅ Config loaded from {}: {} account(s), master alias {}",
        config_path,
        snapshot.accounts.len(),
        snapshot.master_alias()
    );
    if snapshot.master_account().is_err() {
        warn!(
            "master alias {} has no account entry yet",
            snapshot.master_alias()
        );
    }

    let clients: Arc<dyn LedgerClientFactory> = Arc::new(HttpLedgerFactory::from_env());
    let hub = Arc::new(WebhookHub::new());

    Ok(AppState {
        config,
        clients,
        hub,
    })
}
