//! NDISLink API Server
//!
//! Serves the billing endpoints used by the provider dashboard and receives
//! Stripe webhooks.

use std::sync::Arc;

use ndislink_api::auth::JwtManager;
use ndislink_api::{cors_layer, create_router, AppState, Config};
use ndislink_billing::{BillingService, ReturnUrlPolicy};
use ndislink_shared::{create_pool, run_migrations};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ndislink_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting NDISLink API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!(
        bind_address = %config.bind_address,
        allowed_origins = ?config.allowed_origins,
        "Configuration loaded"
    );

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let billing = BillingService::from_env(
        pool,
        ReturnUrlPolicy::new(config.allowed_origins.iter().cloned()),
    )?;
    tracing::info!("Billing service initialized");

    let state = AppState::new(
        Arc::new(billing),
        JwtManager::new(&config.supabase_jwt_secret),
    );

    let app = create_router(state)
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
