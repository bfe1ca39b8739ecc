//! Basic Auth gate for the admin config endpoints.
//!
//! Credentials come from `ADMIN_USERNAME` (default `admin`) and
//! `ADMIN_PASSWORD` (no default). With no password configured the endpoints
//! are unreachable rather than open.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::{header, StatusCode};
use tracing::warn;

const DEFAULT_USERNAME: &str = "admin";

pub async fn require_basic_auth(request: Request, next: Next) -> Response {
    let expected_user =
        std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| DEFAULT_USERNAME.to_string());
    let Ok(expected_password) = std::env::var("ADMIN_PASSWORD") else {
        warn!("ADMIN_PASSWORD not set, refusing admin request");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic)
        .map(|(user, password)| user == expected_user && password == expected_password)
        .unwrap_or(false);

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"config\"")],
        )
            .into_response();
    }
    next.run(request).await
}

fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}
