//! Kaizen HTTP server entry point.

use kaizen_client::shared_client;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = shared_client().await?;
    let app = kaizen_api::router(client);

    let addr =
        std::env::var("KAIZEN_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8787".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Kaizen server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
