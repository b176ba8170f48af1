//! Request extractors for authenticated routes
//!
//! [`CurrentAccount`] resolves `Authorization: Bearer <token>` to a live
//! account through [`AuthService::authenticate`](crate::core::auth::AuthService::authenticate).
//! [`AdminAccount`] additionally requires the admin role.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};

use crate::core::auth::api::AuthApiState;
use crate::core::auth::service::AuthError;
use crate::core::db::models::{Account, Role};

/// The account behind a valid access token
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub Account);

/// An authenticated account holding the admin role
#[derive(Debug, Clone)]
pub struct AdminAccount(pub Account);

/// Extract the Bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Unauthenticated)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Unauthenticated)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::Unauthenticated);
    }

    Ok(token)
}

impl<S> FromRequestParts<S> for CurrentAccount
where
    Arc<AuthApiState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AuthApiState>::from_ref(state);
        let token = extract_bearer_token(&parts.headers)?;

        let account = state.auth_service.authenticate(token).await?;

        Ok(CurrentAccount(account))
    }
}

impl<S> FromRequestParts<S> for AdminAccount
where
    Arc<AuthApiState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentAccount(account) = CurrentAccount::from_request_parts(parts, state).await?;

        if !account.has_role(Role::Admin) {
            tracing::warn!(account_id = %account.id, "Admin route denied");
            return Err(AuthError::Forbidden);
        }

        Ok(AdminAccount(account))
    }
}
