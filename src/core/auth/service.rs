//! Authentication service
//!
//! Business logic for the session lifecycle: signup, credential verification,
//! token issuance, request validation, refresh rotation and invalidation.
//! Coordinates between the account store, the JWT service and the password
//! hasher.
//!
//! Every account carries a `token_version` that is embedded in each token it
//! is issued. Logout, refresh, password change and admin revocation bump it,
//! which invalidates every token minted before the bump.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::core::auth::jwt::{JwtError, JwtService, TokenPair, TokenSubject};
use crate::core::auth::password::{HashingError, PasswordHasher};
use crate::core::auth::reset::{
    DeliveryError, LogResetCodeSender, MAX_RESET_ATTEMPTS, RESET_CODE_TTL_MINUTES,
    ResetCodeSender, generate_reset_code,
};
use crate::core::auth::session::{SessionState, TransitionError};
use crate::core::db::models::{Account, AccountResponse, NewAccount, Role};
use crate::core::db::repositories::{AccountStore, AccountStoreError, hash_token};

/// Maximum page size for account listings
const MAX_PAGE_SIZE: i64 = 100;

/// Times a login re-mints after the version moved under it
const ISSUE_ATTEMPTS: usize = 3;

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid or expired token")]
    TokenInvalid,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account not found")]
    NotFound,

    #[error("Account banned")]
    AccountBanned,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Name must be between 1 and 100 characters")]
    InvalidName,

    #[error("Password too short (minimum 8 characters)")]
    PasswordTooShort,

    #[error("Password too weak")]
    PasswordTooWeak,

    #[error("Invalid or expired reset code")]
    InvalidResetCode,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AccountStoreError> for AuthError {
    fn from(err: AccountStoreError) -> Self {
        match err {
            AccountStoreError::NotFound => AuthError::NotFound,
            AccountStoreError::EmailAlreadyExists => AuthError::EmailAlreadyExists,
            AccountStoreError::DatabaseError(_) => AuthError::InternalError(err.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Malformed => AuthError::Unauthenticated,
            JwtError::Expired | JwtError::InvalidToken | JwtError::InvalidTokenType => {
                AuthError::TokenInvalid
            }
            _ => AuthError::InternalError(err.to_string()),
        }
    }
}

impl From<HashingError> for AuthError {
    fn from(err: HashingError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

impl From<DeliveryError> for AuthError {
    fn from(err: DeliveryError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

impl From<TransitionError> for AuthError {
    fn from(err: TransitionError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

/// Registration request data
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Login request data
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Authentication response with account data and tokens
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthResponse {
    pub user: AccountResponse,
    pub tokens: TokenPair,
}

/// Role a login path requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredRole {
    Any,
    Admin,
}

impl RequiredRole {
    pub fn permits(&self, account: &Account) -> bool {
        match self {
            RequiredRole::Any => true,
            RequiredRole::Admin => account.has_role(Role::Admin),
        }
    }
}

/// Session behavior knobs
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// Bump the token version when a password reset completes
    pub revoke_on_password_reset: bool,
    pub reset_code_ttl_minutes: i64,
    pub max_reset_attempts: i32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            revoke_on_password_reset: false,
            reset_code_ttl_minutes: RESET_CODE_TTL_MINUTES,
            max_reset_attempts: MAX_RESET_ATTEMPTS,
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AccountStore>,
    jwt_service: JwtService,
    hasher: PasswordHasher,
    reset_sender: Arc<dyn ResetCodeSender>,
    policy: SessionPolicy,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(store: Arc<dyn AccountStore>, jwt_service: JwtService) -> Self {
        Self {
            store,
            jwt_service,
            hasher: PasswordHasher::default(),
            reset_sender: Arc::new(LogResetCodeSender),
            policy: SessionPolicy::default(),
        }
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_reset_sender(mut self, sender: Arc<dyn ResetCodeSender>) -> Self {
        self.reset_sender = sender;
        self
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn jwt_service(&self) -> &JwtService {
        &self.jwt_service
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Validate email format
    fn validate_email(email: &str) -> Result<(), AuthError> {
        let Some((local, domain)) = email.split_once('@') else {
            return Err(AuthError::InvalidEmail);
        };

        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(AuthError::InvalidEmail);
        }

        if !domain.contains('.') || domain.split('.').any(|p| p.is_empty()) {
            return Err(AuthError::InvalidEmail);
        }

        if email.chars().any(char::is_whitespace) {
            return Err(AuthError::InvalidEmail);
        }

        Ok(())
    }

    /// Validate display name
    fn validate_name(name: &str) -> Result<(), AuthError> {
        let len = name.chars().count();
        if len == 0 || len > 100 {
            return Err(AuthError::InvalidName);
        }
        Ok(())
    }

    /// Validate password strength
    fn validate_password(password: &str) -> Result<(), AuthError> {
        if password.chars().count() < 8 {
            return Err(AuthError::PasswordTooShort);
        }

        // At least one of each: uppercase, lowercase, digit
        let has_uppercase = password.chars().any(|c| c.is_uppercase());
        let has_lowercase = password.chars().any(|c| c.is_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());

        if !has_uppercase || !has_lowercase || !has_digit {
            return Err(AuthError::PasswordTooWeak);
        }

        Ok(())
    }

    // ========================================================================
    // Credential Verifier / Token Issuer
    // ========================================================================

    /// Check an email/password pair. No side effects.
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Account, AuthError> {
        let email = Self::normalize_email(email);

        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !account.is_active {
            return Err(AuthError::AccountBanned);
        }

        if !self.hasher.verify(password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(account)
    }

    /// Mint a token pair at the account's current version and make its
    /// refresh token the only valid one.
    ///
    /// The write only lands if the version is still the one the pair was
    /// minted at. If a refresh, logout or revoke committed in between, the
    /// account is re-read and the pair minted again.
    pub async fn issue_session(&self, mut account: Account) -> Result<AuthResponse, AuthError> {
        for _ in 0..ISSUE_ATTEMPTS {
            let state = SessionState::Anonymous.login(&account)?;
            let version = state.version().ok_or(AuthError::TokenInvalid)?;

            let tokens = self
                .jwt_service
                .generate_token_pair(&TokenSubject::from_account(&account).with_version(version))?;

            let stored = self
                .store
                .store_refresh_token(account.id, &hash_token(&tokens.refresh_token), version)
                .await?;

            if stored {
                tracing::debug!(account_id = %account.id, ?state, "Session opened");
                return Ok(AuthResponse {
                    user: account.into(),
                    tokens,
                });
            }

            tracing::debug!(
                account_id = %account.id,
                token_version = version,
                "Token version moved during login; minting again"
            );

            account = self
                .store
                .find_by_id(account.id)
                .await?
                .ok_or(AuthError::NotFound)?;
            if !account.is_active {
                return Err(AuthError::AccountBanned);
            }
        }

        tracing::warn!(account_id = %account.id, "Login kept losing to concurrent session changes");
        Err(AuthError::TokenInvalid)
    }

    /// Register a new account and log it in
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AuthError> {
        let email = Self::normalize_email(&request.email);
        let name = request.name.trim().to_string();

        Self::validate_email(&email)?;
        Self::validate_name(&name)?;
        Self::validate_password(&request.password)?;

        let password_hash = self.hasher.hash(&request.password)?;
        let phone = request
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let account = self
            .store
            .create(&NewAccount {
                email,
                name,
                phone,
                password_hash,
                roles: vec![Role::User],
            })
            .await?;

        tracing::info!(account_id = %account.id, "Account registered");

        self.issue_session(account).await
    }

    /// Login an existing account. Admin login uses the same path with
    /// [`RequiredRole::Admin`].
    pub async fn login(
        &self,
        request: LoginRequest,
        required: RequiredRole,
    ) -> Result<AuthResponse, AuthError> {
        let account = self
            .verify_credentials(&request.email, &request.password)
            .await?;

        if !required.permits(&account) {
            tracing::warn!(account_id = %account.id, "Login rejected: missing required role");
            return Err(AuthError::Forbidden);
        }

        self.issue_session(account).await
    }

    // ========================================================================
    // Token Validator
    // ========================================================================

    /// Resolve the account behind an access token.
    ///
    /// Rejects tokens whose embedded version no longer matches the account,
    /// and accounts that have been banned since issuance.
    pub async fn authenticate(&self, access_token: &str) -> Result<Account, AuthError> {
        let claims = self
            .jwt_service
            .validate_access_token(access_token)
            .inspect_err(|e| tracing::debug!(error = %e, "Access token rejected"))?;

        let account_id = claims.account_id().map_err(|_| AuthError::TokenInvalid)?;
        let account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let state = SessionState::observe(&claims, &account);
        if !state.is_active() {
            tracing::debug!(
                account_id = %account.id,
                ?state,
                "Stale access token: rotation happened since issuance"
            );
            return Err(AuthError::TokenInvalid);
        }

        if !account.is_active {
            return Err(AuthError::AccountBanned);
        }

        Ok(account)
    }

    // ========================================================================
    // Rotation / Invalidation
    // ========================================================================

    /// Exchange a refresh token for a new pair.
    ///
    /// The presented token must be the one stored on the account and carry
    /// the current version. The swap to the new token and version `v+1` is a
    /// single compare-and-swap, so of two concurrent refreshes with the same
    /// token exactly one succeeds.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        let claims = self
            .jwt_service
            .validate_refresh_token(refresh_token)
            .map_err(|e| {
                tracing::debug!(error = %e, "Refresh token rejected");
                AuthError::TokenInvalid
            })?;

        let account_id = claims.account_id().map_err(|_| AuthError::TokenInvalid)?;
        let account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if !account.is_active {
            return Err(AuthError::AccountBanned);
        }

        let presented_hash = hash_token(refresh_token);
        if account.refresh_token_hash.as_deref() != Some(presented_hash.as_str()) {
            tracing::debug!(account_id = %account.id, "Refresh token revoked");
            return Err(AuthError::TokenInvalid);
        }

        let next = SessionState::observe(&claims, &account)
            .rotate()
            .map_err(|_| {
                tracing::debug!(account_id = %account.id, "Refresh token revoked: stale version");
                AuthError::TokenInvalid
            })?;
        let next_version = next.version().ok_or(AuthError::TokenInvalid)?;

        let tokens = self
            .jwt_service
            .generate_token_pair(&TokenSubject::from_account(&account).with_version(next_version))?;

        let rotated = self
            .store
            .rotate_refresh_token(
                account.id,
                &presented_hash,
                claims.token_version,
                &hash_token(&tokens.refresh_token),
            )
            .await?;

        let Some(account) = rotated else {
            tracing::warn!(account_id = %account_id, "Concurrent refresh lost the rotation race");
            return Err(AuthError::TokenInvalid);
        };

        tracing::debug!(account_id = %account.id, token_version = account.token_version, "Session rotated");

        Ok(AuthResponse {
            user: account.into(),
            tokens,
        })
    }

    /// Logout by refresh token. Clears the stored token and bumps the version.
    ///
    /// Returns false (and changes nothing) when no account holds the token,
    /// which makes a repeated logout a no-op. A token replaced by a
    /// concurrent refresh or login between lookup and write is already dead
    /// and is treated the same way.
    pub async fn logout(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let token_hash = hash_token(refresh_token);

        let Some(account) = self.store.find_by_refresh_token_hash(&token_hash).await? else {
            tracing::debug!("Logout with unknown refresh token");
            return Ok(false);
        };

        let next = SessionState::Active {
            account_id: account.id,
            version: account.token_version,
        }
        .logout()?;

        let revoked = self
            .store
            .revoke_refresh_token(account.id, &token_hash, account.token_version)
            .await?;

        match revoked {
            Some(account) => {
                tracing::info!(
                    account_id = %account.id,
                    token_version = account.token_version,
                    ?next,
                    "Logged out; sessions revoked"
                );
                Ok(true)
            }
            None => {
                tracing::debug!(account_id = %account.id, "Logout lost to a concurrent session change");
                Ok(false)
            }
        }
    }

    /// Change password (requires the current one). Revokes all sessions.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.hasher.verify(current_password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        Self::validate_password(new_password)?;

        let password_hash = self.hasher.hash(new_password)?;
        let account = self
            .store
            .update_password(account_id, &password_hash, true)
            .await?;

        tracing::info!(
            account_id = %account.id,
            token_version = account.token_version,
            "Password changed; sessions revoked"
        );

        Ok(())
    }

    // ========================================================================
    // Password Reset
    // ========================================================================

    /// Issue a reset code. Unknown or banned emails succeed silently.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = Self::normalize_email(email);

        let Some(account) = self.store.find_by_email(&email).await? else {
            tracing::debug!("Reset requested for unknown email");
            return Ok(());
        };

        if !account.is_active {
            tracing::debug!(account_id = %account.id, "Reset requested for banned account");
            return Ok(());
        }

        let code = generate_reset_code();
        let expires_at = Utc::now() + Duration::minutes(self.policy.reset_code_ttl_minutes);

        self.store
            .set_reset_code(account.id, &hash_token(&code), expires_at)
            .await?;
        self.reset_sender.send(&account.email, &code).await?;

        Ok(())
    }

    /// Complete a reset with the delivered code.
    ///
    /// Wrong codes count against the pending one, which is cleared after
    /// `max_reset_attempts` misses. Existing sessions survive unless the
    /// policy says otherwise.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let email = Self::normalize_email(email);

        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidResetCode)?;

        let code_matches = self
            .store
            .check_reset_code(
                account.id,
                &hash_token(code.trim()),
                self.policy.max_reset_attempts,
            )
            .await?;

        if !code_matches {
            tracing::debug!(account_id = %account.id, "Reset code rejected");
            return Err(AuthError::InvalidResetCode);
        }

        Self::validate_password(new_password)?;

        let password_hash = self.hasher.hash(new_password)?;
        let account = self
            .store
            .update_password(
                account.id,
                &password_hash,
                self.policy.revoke_on_password_reset,
            )
            .await?;

        tracing::info!(
            account_id = %account.id,
            sessions_revoked = self.policy.revoke_on_password_reset,
            "Password reset completed"
        );

        Ok(())
    }

    // ========================================================================
    // Admin Operations
    // ========================================================================

    pub async fn list_accounts(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AccountResponse>, AuthError> {
        let accounts = self
            .store
            .list(limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await?;

        Ok(accounts.into_iter().map(AccountResponse::from).collect())
    }

    /// Ban or unban. The version is left alone; the validator's active check
    /// stops outstanding tokens of a banned account.
    pub async fn set_active(
        &self,
        account_id: Uuid,
        is_active: bool,
    ) -> Result<AccountResponse, AuthError> {
        let account = self
            .store
            .set_active(account_id, is_active)
            .await
            .map_err(|e| Self::admin_target_error(e, account_id))?;

        if is_active {
            tracing::info!(account_id = %account.id, "Account reactivated");
        } else {
            tracing::warn!(account_id = %account.id, "Account banned");
        }

        Ok(account.into())
    }

    /// Forced logout of every session of an account
    pub async fn revoke_sessions(&self, account_id: Uuid) -> Result<AccountResponse, AuthError> {
        let account = self
            .store
            .revoke_sessions(account_id)
            .await
            .map_err(|e| Self::admin_target_error(e, account_id))?;

        tracing::warn!(
            account_id = %account.id,
            token_version = account.token_version,
            "Sessions revoked by admin"
        );

        Ok(account.into())
    }

    /// Soft-remove an account
    pub async fn remove_account(&self, account_id: Uuid) -> Result<(), AuthError> {
        if !self.store.soft_delete(account_id).await? {
            return Err(AuthError::AccountNotFound(account_id));
        }

        tracing::warn!(account_id = %account_id, "Account removed");
        Ok(())
    }

    fn admin_target_error(err: AccountStoreError, account_id: Uuid) -> AuthError {
        match err {
            AccountStoreError::NotFound => AuthError::AccountNotFound(account_id),
            other => other.into(),
        }
    }
}
