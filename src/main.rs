//! ThreatLens - Main Entry Point

use std::sync::Arc;
use threatlens::{build_router, InferenceContext, ServiceConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ThreatLens v{}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::from_env();

    // Missing artifacts only disable their own endpoints
    let context = Arc::new(InferenceContext::load(&config));
    let app = build_router(context);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
