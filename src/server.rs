use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::{
        config::{get_config, put_config},
        health_check,
        monitor::stream_webhooks,
        webhook::handle_webhook,
        AppState,
    },
    error::AppResult,
    middleware::basic_auth::require_basic_auth,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let admin = Router::new()
        .route("/api/config", get(get_config).put(put_config))
        .route_layer(middleware::from_fn(require_basic_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/webhook/:alias", post(handle_webhook))
        .route("/api/monitor/webhooks/stream", get(stream_webhooks))
        .merge(admin)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(app: Router, bind_address: &str) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Listening on {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}
