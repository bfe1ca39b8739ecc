//! Inbound webhook endpoint: `POST /webhook/:alias`.
//!
//! The path alias decides which signing secret applies and which role the
//! event is processed under. Verification happens against the raw body
//! before anything is parsed; a deliberate no-op (no scenario matched) is
//! still a 200 so the platform does not redeliver.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chrono::Utc;
use tracing::{debug, error};

use super::signature::{self, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};
use super::AppState;
use crate::config::normalize_alias;
use crate::error::{AppResult, SignatureError};
use crate::event::WebhookEvent;
use crate::monitor::MonitorEvent;
use crate::orchestration::{dispatch, Scenario, ScenarioContext};

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<&'static str> {
    let alias = normalize_alias(&alias);
    let snapshot = state.config.snapshot()?;
    let account = snapshot.account(&alias)?.clone();
    let secret = snapshot.signing_secret(&alias)?;

    let header = headers
        .get(SIGNATURE_HEADER)
        .ok_or(SignatureError::MissingHeader)?
        .to_str()
        .map_err(|_| SignatureError::Malformed("non-ASCII header value".to_string()))?;
    signature::verify(
        &body,
        header,
        secret,
        DEFAULT_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )?;

    let event: WebhookEvent = serde_json::from_slice(&body)?;

    state.hub.publish(MonitorEvent::now(
        alias.as_str(),
        account.account_id.as_str(),
        account.country.clone(),
        event.event_type.as_str(),
    ));

    let role = snapshot.role(&alias);
    match Scenario::classify(role, &event) {
        Some(scenario) => {
            let ctx = ScenarioContext::new(&alias, snapshot, state.clients.clone())?;
            if let Err(e) = dispatch(scenario, &ctx, &event).await {
                error!(
                    scenario = scenario.name(),
                    alias = %alias,
                    event_type = %event.event_type,
                    error = %e,
                    "scenario handler failed"
                );
                return Err(e);
            }
        }
        None => {
            debug!(
                alias = %alias,
                event_type = %event.event_type,
                "no scenario for event, acknowledging"
            );
        }
    }

    Ok("ok")
}
