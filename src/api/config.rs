//! Admin endpoints for the runtime configuration. Both sit behind Basic
//! Auth (see `middleware::basic_auth`); a PUT persists atomically and takes
//! effect for the next webhook, never for requests already in flight.

use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::config::{normalize_alias, RuntimeConfig};
use crate::error::{AppError, AppResult};

pub async fn get_config(State(state): State<AppState>) -> AppResult<Json<RuntimeConfig>> {
    let snapshot = state.config.snapshot()?;
    Ok(Json((*snapshot).clone()))
}

pub async fn put_config(
    State(state): State<AppState>,
    Json(mut config): Json<RuntimeConfig>,
) -> AppResult<Json<RuntimeConfig>> {
    config.master_account_alias = normalize_alias(&config.master_account_alias);
    if config.master_account_alias.is_empty() {
        return Err(AppError::BadRequest(
            "master_account_alias must not be empty".to_string(),
        ));
    }
    if !config.accounts.contains_key(&config.master_account_alias) {
        return Err(AppError::BadRequest(format!(
            "master alias {} has no account entry",
            config.master_account_alias
        )));
    }
    state.config.save(&config)?;
    Ok(Json(config))
}
