//! PayPal webhook listener

use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

mod error;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api=debug".parse()?)
                .add_directive("paypal=debug".parse()?),
        )
        .init();

    info!("Starting PayPal webhook listener");

    // Load configuration
    let config = common::Config::from_env()?;

    tokio::fs::create_dir_all(&config.cache_dir).await?;
    info!(
        "📁 Caching signing certificates in {}",
        config.cache_dir.display()
    );

    let state = Arc::new(AppState::new(config.clone())?);
    info!(
        "🔐 Verifying webhook {} with certificates from {}",
        state.verifier.webhook_id(),
        state.verifier.certs().policy().allowed_hosts().join(", ")
    );

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    info!("🚀 Listening on {}{}", addr, config.listen_path);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
