//! Application assembly
//!
//! Picks the account store, builds the auth service from [`Config`] and
//! mounts the routes with tracing and CORS layers.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::core::auth::{
    AuthApiState, AuthService, CookiePolicy, JwtService, PasswordHasher, SessionPolicy,
    auth_api_router,
};
use crate::core::config::Config;
use crate::core::db::{
    AccountStore, DbError, MemoryAccountStore, PgAccountStore, PgPool,
    create_pool_with_migrations, health_check,
};

/// Startup errors
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),
}

#[derive(Clone)]
struct HealthState {
    pool: Option<PgPool>,
}

/// Connect to PostgreSQL when configured, otherwise fall back to memory
pub async fn build_store(
    config: &Config,
) -> Result<(Arc<dyn AccountStore>, Option<PgPool>), AppError> {
    match &config.database {
        Some(db_config) => {
            let pool = create_pool_with_migrations(db_config).await?;
            tracing::info!("Connected to PostgreSQL");
            Ok((Arc::new(PgAccountStore::new(pool.clone())), Some(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; accounts are kept in memory and lost on restart");
            Ok((Arc::new(MemoryAccountStore::new()), None))
        }
    }
}

/// Build the auth service described by the configuration
pub fn build_auth_service(config: &Config, store: Arc<dyn AccountStore>) -> AuthService {
    AuthService::new(store, JwtService::new(config.jwt.clone()))
        .with_hasher(PasswordHasher::new(config.bcrypt_cost))
        .with_policy(SessionPolicy {
            revoke_on_password_reset: config.revoke_sessions_on_password_reset,
            ..Default::default()
        })
}

/// Full HTTP application
pub fn build_router(
    config: &Config,
    auth_service: AuthService,
    pool: Option<PgPool>,
) -> Result<Router, AppError> {
    let cookie_policy = CookiePolicy::for_environment(
        config.is_production(),
        config.jwt.refresh_token_expiration_days,
    );

    let health = Router::new()
        .route("/health", get(health_handler))
        .with_state(HealthState { pool });

    let router = auth_api_router(AuthApiState::new(auth_service, cookie_policy))
        .merge(health)
        .layer(TraceLayer::new_for_http());

    Ok(match &config.cors_origin {
        Some(origin) => router.layer(cors_layer(origin)?),
        None => router,
    })
}

/// Credentialed CORS for a single browser origin, so the refresh cookie is sent
fn cors_layer(origin: &str) -> Result<CorsLayer, AppError> {
    let origin: HeaderValue = origin
        .parse()
        .map_err(|_| AppError::InvalidCorsOrigin(origin.to_string()))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// GET /health
async fn health_handler(
    State(state): State<HealthState>,
) -> Result<&'static str, (StatusCode, &'static str)> {
    if let Some(pool) = &state.pool {
        health_check(pool).await.map_err(|e| {
            tracing::error!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        })?;
    }

    Ok("ok")
}
