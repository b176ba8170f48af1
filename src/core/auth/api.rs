//! Auth API endpoints
//!
//! REST endpoints for the session lifecycle:
//! - POST /user/register - Register a new account
//! - POST /user/login - Login and get tokens
//! - POST /user/admin/login - Login restricted to admins
//! - POST /user/logout - Revoke the session behind the refresh cookie
//! - GET /user/refreshToken - Rotate the refresh cookie and get a new access token
//! - GET /user/current - Current account info
//! - PUT /user/password - Change password
//! - POST /user/forgot-password, /user/reset-password - Password reset by code
//! - /user/admin/accounts/* - Account administration
//!
//! The refresh token travels only in the `refreshToken` cookie; the access
//! token only in response bodies.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::auth::extract::{AdminAccount, CurrentAccount};
use crate::core::auth::service::{
    AuthError, AuthResponse, AuthService, LoginRequest, RegisterRequest, RequiredRole,
};
use crate::core::db::models::AccountResponse;

/// Name of the refresh token cookie
pub const REFRESH_COOKIE: &str = "refreshToken";

const DEFAULT_PAGE_SIZE: i64 = 50;

/// How the refresh cookie is written
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub same_site: SameSite,
    pub secure: bool,
    pub max_age_days: i64,
}

impl CookiePolicy {
    /// Strict + Secure in production, Lax otherwise
    pub fn for_environment(production: bool, max_age_days: i64) -> Self {
        Self {
            same_site: if production {
                SameSite::Strict
            } else {
                SameSite::Lax
            },
            secure: production,
            max_age_days,
        }
    }

    fn refresh_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((REFRESH_COOKIE, token))
            .http_only(true)
            .same_site(self.same_site)
            .secure(self.secure)
            .path("/")
            .max_age(time::Duration::days(self.max_age_days))
            .build()
    }

    /// Expired empty cookie; emitted whether or not the request carried one
    fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((REFRESH_COOKIE, ""))
            .http_only(true)
            .same_site(self.same_site)
            .secure(self.secure)
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

/// Auth API state containing the auth service
#[derive(Clone)]
pub struct AuthApiState {
    pub auth_service: AuthService,
    pub cookie_policy: CookiePolicy,
}

impl AuthApiState {
    pub fn new(auth_service: AuthService, cookie_policy: CookiePolicy) -> Self {
        Self {
            auth_service,
            cookie_policy,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AuthError::TokenInvalid => (StatusCode::UNAUTHORIZED, "TOKEN_INVALID"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            AuthError::NotFound => (StatusCode::UNAUTHORIZED, "NOT_FOUND"),
            AuthError::AccountBanned => (StatusCode::FORBIDDEN, "ACCOUNT_BANNED"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AuthError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            AuthError::EmailAlreadyExists => (StatusCode::CONFLICT, "EMAIL_EXISTS"),
            AuthError::InvalidEmail => (StatusCode::BAD_REQUEST, "INVALID_EMAIL"),
            AuthError::InvalidName => (StatusCode::BAD_REQUEST, "INVALID_NAME"),
            AuthError::PasswordTooShort => (StatusCode::BAD_REQUEST, "PASSWORD_TOO_SHORT"),
            AuthError::PasswordTooWeak => (StatusCode::BAD_REQUEST, "PASSWORD_TOO_WEAK"),
            AuthError::InvalidResetCode => (StatusCode::BAD_REQUEST, "INVALID_RESET_CODE"),
            AuthError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = match &self {
            AuthError::InternalError(detail) => {
                tracing::error!(error = %detail, "Internal error in auth API");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ApiError::new(message, code))).into_response()
    }
}

/// Body returned when a session is opened or rotated
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub access_token: String,
    pub user: AccountResponse,
}

/// Response for logout
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Request for changing password
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ListAccountsQuery {
    #[serde(default = "default_page_size")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/user/register", post(register_handler))
        .route("/user/login", post(login_handler))
        .route("/user/admin/login", post(admin_login_handler))
        .route("/user/logout", post(logout_handler))
        .route("/user/refreshToken", get(refresh_handler))
        .route("/user/current", get(current_handler))
        .route("/user/password", put(change_password_handler))
        .route("/user/forgot-password", post(forgot_password_handler))
        .route("/user/reset-password", post(reset_password_handler))
        .route("/user/admin/accounts", get(list_accounts_handler))
        .route("/user/admin/accounts/{id}", delete(remove_account_handler))
        .route("/user/admin/accounts/{id}/ban", put(ban_handler))
        .route("/user/admin/accounts/{id}/unban", put(unban_handler))
        .route("/user/admin/accounts/{id}/revoke", post(revoke_handler))
        .with_state(state)
}

/// Put the refresh token in the cookie and the access token in the body
fn open_session(
    state: &AuthApiState,
    jar: CookieJar,
    response: AuthResponse,
) -> (CookieJar, Json<SessionBody>) {
    let jar = jar.add(
        state
            .cookie_policy
            .refresh_cookie(response.tokens.refresh_token),
    );

    (
        jar,
        Json(SessionBody {
            access_token: response.tokens.access_token,
            user: response.user,
        }),
    )
}

/// POST /user/register
async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<SessionBody>), AuthError> {
    tracing::info!("Registration attempt for email: {}", request.email);

    let response = state.auth_service.register(request).await?;

    tracing::info!("Account registered successfully: {}", response.user.email);

    Ok(open_session(&state, jar, response))
}

/// POST /user/login
async fn login_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionBody>), AuthError> {
    tracing::info!("Login attempt for email: {}", request.email);

    let response = state
        .auth_service
        .login(request, RequiredRole::Any)
        .await?;

    tracing::info!("Logged in successfully: {}", response.user.email);

    Ok(open_session(&state, jar, response))
}

/// POST /user/admin/login
async fn admin_login_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionBody>), AuthError> {
    tracing::info!("Admin login attempt for email: {}", request.email);

    let response = state
        .auth_service
        .login(request, RequiredRole::Admin)
        .await?;

    tracing::info!("Admin logged in successfully: {}", response.user.email);

    Ok(open_session(&state, jar, response))
}

/// POST /user/logout
/// Always clears the cookie, even when it named no session
async fn logout_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LogoutResponse>), AuthError> {
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        state.auth_service.logout(cookie.value()).await?;
    } else {
        tracing::debug!("Logout without refresh cookie");
    }

    let jar = jar.add(state.cookie_policy.removal_cookie());

    Ok((
        jar,
        Json(LogoutResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// GET /user/refreshToken
async fn refresh_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionBody>), AuthError> {
    tracing::debug!("Token refresh request");

    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AuthError::TokenInvalid)?;

    let response = state.auth_service.refresh(&token).await?;

    Ok(open_session(&state, jar, response))
}

/// GET /user/current
async fn current_handler(CurrentAccount(account): CurrentAccount) -> Json<AccountResponse> {
    Json(account.into())
}

/// PUT /user/password
/// Change password (requires current password). Ends every session.
async fn change_password_handler(
    State(state): State<Arc<AuthApiState>>,
    CurrentAccount(account): CurrentAccount,
    jar: CookieJar,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<SuccessResponse>), AuthError> {
    state
        .auth_service
        .change_password(account.id, &request.current_password, &request.new_password)
        .await?;

    tracing::info!("Password changed for account: {}", account.id);

    let jar = jar.add(state.cookie_policy.removal_cookie());

    Ok((
        jar,
        Json(SuccessResponse::ok(
            "Password changed successfully. Please login again.",
        )),
    ))
}

/// POST /user/forgot-password
async fn forgot_password_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<SuccessResponse>, AuthError> {
    state.auth_service.forgot_password(&request.email).await?;

    Ok(Json(SuccessResponse::ok(
        "If the account exists, a reset code has been sent.",
    )))
}

/// POST /user/reset-password
async fn reset_password_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<SuccessResponse>, AuthError> {
    state
        .auth_service
        .reset_password(&request.email, &request.code, &request.new_password)
        .await?;

    Ok(Json(SuccessResponse::ok("Password reset successfully.")))
}

/// GET /user/admin/accounts
async fn list_accounts_handler(
    State(state): State<Arc<AuthApiState>>,
    AdminAccount(_admin): AdminAccount,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<Vec<AccountResponse>>, AuthError> {
    let accounts = state
        .auth_service
        .list_accounts(query.limit, query.offset)
        .await?;

    Ok(Json(accounts))
}

/// PUT /user/admin/accounts/{id}/ban
async fn ban_handler(
    State(state): State<Arc<AuthApiState>>,
    AdminAccount(admin): AdminAccount,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AuthError> {
    tracing::info!("Admin {} banning account {}", admin.id, id);

    Ok(Json(state.auth_service.set_active(id, false).await?))
}

/// PUT /user/admin/accounts/{id}/unban
async fn unban_handler(
    State(state): State<Arc<AuthApiState>>,
    AdminAccount(admin): AdminAccount,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AuthError> {
    tracing::info!("Admin {} unbanning account {}", admin.id, id);

    Ok(Json(state.auth_service.set_active(id, true).await?))
}

/// POST /user/admin/accounts/{id}/revoke
async fn revoke_handler(
    State(state): State<Arc<AuthApiState>>,
    AdminAccount(admin): AdminAccount,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AuthError> {
    tracing::info!("Admin {} revoking sessions of account {}", admin.id, id);

    Ok(Json(state.auth_service.revoke_sessions(id).await?))
}

/// DELETE /user/admin/accounts/{id}
async fn remove_account_handler(
    State(state): State<Arc<AuthApiState>>,
    AdminAccount(admin): AdminAccount,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, AuthError> {
    tracing::info!("Admin {} removing account {}", admin.id, id);

    state.auth_service.remove_account(id).await?;

    Ok(Json(SuccessResponse::ok("Account removed.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::jwt::{JwtConfig, JwtService};
    use crate::core::auth::password::PasswordHasher;
    use crate::core::auth::reset::RecordingResetCodeSender;
    use crate::core::db::models::{NewAccount, Role};
    use crate::core::db::repositories::{AccountStore, MemoryAccountStore};
    use axum::body::Body;
    use axum::http::{HeaderMap, Method, Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const SECRET: &str = "test_secret_key_for_testing_only_32bytes!";

    struct TestApp {
        router: Router,
        store: Arc<MemoryAccountStore>,
        mailer: Arc<RecordingResetCodeSender>,
    }

    fn test_app(production: bool) -> TestApp {
        let store = Arc::new(MemoryAccountStore::new());
        let mailer = Arc::new(RecordingResetCodeSender::default());
        let service = AuthService::new(store.clone(), JwtService::new(JwtConfig::new(SECRET)))
            .with_hasher(PasswordHasher::new(4))
            .with_reset_sender(mailer.clone());

        let router = auth_api_router(AuthApiState::new(
            service,
            CookiePolicy::for_environment(production, 7),
        ));

        TestApp {
            router,
            store,
            mailer,
        }
    }

    async fn seed(app: &TestApp, email: &str, password: &str, roles: Vec<Role>) -> Uuid {
        app.store
            .create(&NewAccount {
                email: email.to_string(),
                name: "Seeded".to_string(),
                phone: None,
                password_hash: PasswordHasher::new(4).hash(password).unwrap(),
                roles,
            })
            .await
            .unwrap()
            .id
    }

    struct Call<'a> {
        method: Method,
        uri: &'a str,
        bearer: Option<&'a str>,
        cookie: Option<&'a str>,
        body: Option<Value>,
    }

    impl<'a> Call<'a> {
        fn new(method: Method, uri: &'a str) -> Self {
            Self {
                method,
                uri,
                bearer: None,
                cookie: None,
                body: None,
            }
        }

        fn bearer(mut self, token: &'a str) -> Self {
            self.bearer = Some(token);
            self
        }

        fn cookie(mut self, token: &'a str) -> Self {
            self.cookie = Some(token);
            self
        }

        fn json(mut self, body: Value) -> Self {
            self.body = Some(body);
            self
        }
    }

    async fn send(app: &TestApp, call: Call<'_>) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(call.method).uri(call.uri);
        if let Some(token) = call.bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(token) = call.cookie {
            builder = builder.header(header::COOKIE, format!("{REFRESH_COOKIE}={token}"));
        }

        let request = match call.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, headers, body)
    }

    fn set_cookie(headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{REFRESH_COOKIE}=")))
            .map(str::to_string)
    }

    fn cookie_value(headers: &HeaderMap) -> String {
        let raw = set_cookie(headers).expect("refresh cookie set");
        raw.split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, v)| v.to_string())
            .unwrap()
    }

    async fn login(app: &TestApp, email: &str, password: &str) -> (String, String) {
        let (status, headers, body) = send(
            app,
            Call::new(Method::POST, "/user/login")
                .json(json!({ "email": email, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        (
            body["accessToken"].as_str().unwrap().to_string(),
            cookie_value(&headers),
        )
    }

    // ========================================================================
    // Error Mapping Tests
    // ========================================================================

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (AuthError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AuthError::TokenInvalid, StatusCode::UNAUTHORIZED),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::NotFound, StatusCode::UNAUTHORIZED),
            (AuthError::AccountBanned, StatusCode::FORBIDDEN),
            (AuthError::Forbidden, StatusCode::FORBIDDEN),
            (AuthError::AccountNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (AuthError::EmailAlreadyExists, StatusCode::CONFLICT),
            (AuthError::InvalidResetCode, StatusCode::BAD_REQUEST),
            (
                AuthError::InternalError("db down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_internal_error_body_hides_detail() {
        let response = AuthError::InternalError("connection refused".to_string()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body["error"].as_str().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_request_deserialization_is_camel_case() {
        let request: ChangePasswordRequest = serde_json::from_str(
            r#"{"currentPassword": "OldPassword123", "newPassword": "NewPassword456"}"#,
        )
        .unwrap();
        assert_eq!(request.current_password, "OldPassword123");
        assert_eq!(request.new_password, "NewPassword456");

        let request: ResetPasswordRequest = serde_json::from_str(
            r#"{"email": "a@x.com", "code": "123456", "newPassword": "NewPassword456"}"#,
        )
        .unwrap();
        assert_eq!(request.new_password, "NewPassword456");
    }

    // ========================================================================
    // Cookie Policy Tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_sets_strict_cookie_in_production() {
        let app = test_app(true);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;

        let (status, headers, body) = send(
            &app,
            Call::new(Method::POST, "/user/login")
                .json(json!({ "email": "a@x.com", "password": "secret" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let cookie = set_cookie(&headers).unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=604800"));

        assert!(body["accessToken"].is_string());
        assert!(body.get("refreshToken").is_none());
        assert_eq!(body["user"]["email"], "a@x.com");
        assert_eq!(body["user"]["isActive"], true);
        assert!(body["user"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_login_sets_lax_cookie_outside_production() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;

        let (_, headers, _) = send(
            &app,
            Call::new(Method::POST, "/user/login")
                .json(json!({ "email": "a@x.com", "password": "secret" })),
        )
        .await;

        let cookie = set_cookie(&headers).unwrap();
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
    }

    // ========================================================================
    // Login / Register Tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_failures() {
        let app = test_app(false);
        let banned = seed(&app, "banned@x.com", "secret", vec![Role::User]).await;
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        app.store.set_active(banned, false).await.unwrap();

        let cases = [
            ("a@x.com", "wrong", StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            ("nobody@x.com", "secret", StatusCode::UNAUTHORIZED, "NOT_FOUND"),
            ("banned@x.com", "secret", StatusCode::FORBIDDEN, "ACCOUNT_BANNED"),
        ];

        for (email, password, status, code) in cases {
            let (got, headers, body) = send(
                &app,
                Call::new(Method::POST, "/user/login")
                    .json(json!({ "email": email, "password": password })),
            )
            .await;
            assert_eq!(got, status, "{email}");
            assert_eq!(body["code"], code);
            assert!(set_cookie(&headers).is_none());
        }
    }

    #[tokio::test]
    async fn test_admin_login_rejects_non_admin() {
        let app = test_app(false);
        seed(&app, "user@x.com", "secret", vec![Role::User]).await;
        seed(&app, "admin@x.com", "secret", vec![Role::User, Role::Admin]).await;

        let (status, _, body) = send(
            &app,
            Call::new(Method::POST, "/user/admin/login")
                .json(json!({ "email": "user@x.com", "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let (status, _, body) = send(
            &app,
            Call::new(Method::POST, "/user/admin/login")
                .json(json!({ "email": "admin@x.com", "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["roles"], json!(["user", "admin"]));
    }

    #[tokio::test]
    async fn test_register_then_duplicate() {
        let app = test_app(false);
        let payload = json!({
            "email": "new@example.com",
            "name": "Newcomer",
            "password": "Password1",
            "phone": "+1 555 0100"
        });

        let (status, headers, body) = send(
            &app,
            Call::new(Method::POST, "/user/register").json(payload.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(set_cookie(&headers).is_some());
        assert_eq!(body["user"]["phone"], "+1 555 0100");
        assert_eq!(body["user"]["roles"], json!(["user"]));

        let (status, _, body) =
            send(&app, Call::new(Method::POST, "/user/register").json(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "EMAIL_EXISTS");
    }

    // ========================================================================
    // Session Lifecycle Tests
    // ========================================================================

    #[tokio::test]
    async fn test_current_requires_bearer() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        let (access, _) = login(&app, "a@x.com", "secret").await;

        let (status, _, body) = send(&app, Call::new(Method::GET, "/user/current")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let (status, _, body) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&access)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@x.com");
    }

    #[tokio::test]
    async fn test_logout_scenario() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        let (t1, r1) = login(&app, "a@x.com", "secret").await;

        let (status, headers, _) =
            send(&app, Call::new(Method::POST, "/user/logout").cookie(&r1)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(set_cookie(&headers).unwrap().contains("Max-Age=0"));

        let (status, _, body) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&t1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_INVALID");

        let (status, _, _) =
            send(&app, Call::new(Method::GET, "/user/refreshToken").cookie(&r1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Second logout is a no-op that still succeeds
        let (status, _, _) =
            send(&app, Call::new(Method::POST, "/user/logout").cookie(&r1)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_rotates_cookie() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        let (_, r1) = login(&app, "a@x.com", "secret").await;

        let (status, headers, body) =
            send(&app, Call::new(Method::GET, "/user/refreshToken").cookie(&r1)).await;
        assert_eq!(status, StatusCode::OK);
        let r2 = cookie_value(&headers);
        assert_ne!(r1, r2);
        let t2 = body["accessToken"].as_str().unwrap().to_string();

        let (status, _, _) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&t2)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            send(&app, Call::new(Method::GET, "/user/refreshToken").cookie(&r1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_INVALID");

        let (status, _, _) =
            send(&app, Call::new(Method::GET, "/user/refreshToken").cookie(&r2)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_without_cookie() {
        let app = test_app(false);

        let (status, _, body) = send(&app, Call::new(Method::GET, "/user/refreshToken")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_INVALID");
    }

    #[tokio::test]
    async fn test_change_password_ends_sessions() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        let (access, refresh) = login(&app, "a@x.com", "secret").await;

        let (status, headers, body) = send(
            &app,
            Call::new(Method::PUT, "/user/password")
                .bearer(&access)
                .json(json!({ "currentPassword": "secret", "newPassword": "NewPassword1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(set_cookie(&headers).unwrap().contains("Max-Age=0"));

        let (status, _, _) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&access)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) =
            send(&app, Call::new(Method::GET, "/user/refreshToken").cookie(&refresh)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        login(&app, "a@x.com", "NewPassword1").await;
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;

        let (status, _, _) = send(
            &app,
            Call::new(Method::POST, "/user/forgot-password").json(json!({ "email": "a@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let code = app.mailer.last_code_for("a@x.com").unwrap();

        let (status, _, body) = send(
            &app,
            Call::new(Method::POST, "/user/reset-password").json(
                json!({ "email": "a@x.com", "code": "not-it", "newPassword": "NewPassword1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_RESET_CODE");

        let (status, _, _) = send(
            &app,
            Call::new(Method::POST, "/user/reset-password").json(
                json!({ "email": "a@x.com", "code": code, "newPassword": "NewPassword1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        login(&app, "a@x.com", "NewPassword1").await;
    }

    // ========================================================================
    // Admin Route Tests
    // ========================================================================

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let app = test_app(false);
        seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        let (access, _) = login(&app, "a@x.com", "secret").await;

        let (status, _, body) = send(
            &app,
            Call::new(Method::GET, "/user/admin/accounts").bearer(&access),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let (status, _, _) = send(&app, Call::new(Method::GET, "/user/admin/accounts")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ban_rejects_existing_token() {
        let app = test_app(false);
        let user = seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        seed(&app, "admin@x.com", "secret", vec![Role::Admin]).await;
        let (user_access, _) = login(&app, "a@x.com", "secret").await;
        let (admin_access, _) = login(&app, "admin@x.com", "secret").await;

        let uri = format!("/user/admin/accounts/{user}/ban");
        let (status, _, body) =
            send(&app, Call::new(Method::PUT, &uri).bearer(&admin_access)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isActive"], false);

        let (status, _, body) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&user_access)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "ACCOUNT_BANNED");

        let uri = format!("/user/admin/accounts/{user}/unban");
        let (status, _, _) = send(&app, Call::new(Method::PUT, &uri).bearer(&admin_access)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&user_access)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_revoke_and_remove() {
        let app = test_app(false);
        let user = seed(&app, "a@x.com", "secret", vec![Role::User]).await;
        seed(&app, "admin@x.com", "secret", vec![Role::Admin]).await;
        let (user_access, _) = login(&app, "a@x.com", "secret").await;
        let (admin_access, _) = login(&app, "admin@x.com", "secret").await;

        let uri = format!("/user/admin/accounts/{user}/revoke");
        let (status, _, _) = send(&app, Call::new(Method::POST, &uri).bearer(&admin_access)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            send(&app, Call::new(Method::GET, "/user/current").bearer(&user_access)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_INVALID");

        let uri = format!("/user/admin/accounts/{user}");
        let (status, _, _) =
            send(&app, Call::new(Method::DELETE, &uri).bearer(&admin_access)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            send(&app, Call::new(Method::DELETE, &uri).bearer(&admin_access)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "ACCOUNT_NOT_FOUND");

        let (status, _, body) = send(
            &app,
            Call::new(Method::GET, "/user/admin/accounts?limit=10").bearer(&admin_access),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }
}
