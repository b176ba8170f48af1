use storefront_auth::app::{build_auth_service, build_router, build_store};
use storefront_auth::core::config::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "storefront-auth starting");

    let config = Config::from_env()?;

    // Log config status (without revealing secrets)
    info!(
        "Config loaded: environment={:?}, database={}, cors_origin={:?}",
        config.environment,
        config.has_database(),
        config.cors_origin
    );
    if config.using_dev_secret {
        tracing::warn!("JWT_SECRET not set; signing tokens with the development secret");
    }

    let (store, pool) = build_store(&config).await?;
    let auth_service = build_auth_service(&config, store);
    let app = build_router(&config, auth_service, pool)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on: http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
