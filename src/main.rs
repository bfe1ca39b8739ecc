mod api;
mod bootstrap;
mod config;
mod error;
mod event;
mod ledger;
mod metadata;
mod middleware;
mod monitor;
mod orchestration;
mod server;
mod timestamps;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("🚀 Starting multi-account ledger webhook orchestrator");

    dotenv::dotenv().ok();
    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let state = bootstrap::initialize_app_state()?;
    let app = server::create_app(state).await;

    server::run_server(app, &bind_address).await?;

    Ok(())
}
