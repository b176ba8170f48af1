//! JWT utilities for token generation and validation
//!
//! Provides JWT token creation and validation using the HS256 algorithm.
//! Access tokens are short-lived (15 minutes), refresh tokens are long-lived (7 days).
//! Both carry the account's token version at issuance time.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::db::models::{Account, Role};

/// Default access token expiration time (15 minutes)
const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Default refresh token expiration time (7 days)
const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

const DEFAULT_ISSUER: &str = "storefront";

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for signing tokens
    pub secret: String,
    /// Access token expiration in minutes
    pub access_token_expiration_minutes: i64,
    /// Refresh token expiration in days
    pub refresh_token_expiration_days: i64,
    /// Token issuer
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field(
                "access_token_expiration_minutes",
                &self.access_token_expiration_minutes,
            )
            .field(
                "refresh_token_expiration_days",
                &self.refresh_token_expiration_days,
            )
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expiration_minutes: ACCESS_TOKEN_EXPIRATION_MINUTES,
            refresh_token_expiration_days: REFRESH_TOKEN_EXPIRATION_DAYS,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Set access token expiration
    pub fn access_token_expiration(mut self, minutes: i64) -> Self {
        self.access_token_expiration_minutes = minutes;
        self
    }

    /// Set refresh token expiration
    pub fn refresh_token_expiration(mut self, days: i64) -> Self {
        self.refresh_token_expiration_days = days;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Token decoding failed: {0}")]
    DecodingError(String),

    #[error("Token expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token type")]
    InvalidTokenType,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => JwtError::Malformed,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::ImmatureSignature => JwtError::InvalidToken,
            _ => JwtError::DecodingError(err.to_string()),
        }
    }
}

/// Token type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account ID)
    pub sub: String,
    /// Account email
    pub email: String,
    /// Account roles at issuance
    pub roles: Vec<Role>,
    /// Account token version at issuance
    pub token_version: i64,
    /// Token type (access or refresh)
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

impl Claims {
    /// Check if this is an access token
    pub fn is_access_token(&self) -> bool {
        self.token_type == TokenType::Access
    }

    /// Check if this is a refresh token
    pub fn is_refresh_token(&self) -> bool {
        self.token_type == TokenType::Refresh
    }

    /// Get account ID as UUID
    pub fn account_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }
}

/// Identity embedded in a token pair
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub account_id: Uuid,
    pub email: String,
    pub roles: Vec<Role>,
    pub token_version: i64,
}

impl TokenSubject {
    /// Subject carrying the account's current version
    pub fn from_account(account: &Account) -> Self {
        Self {
            account_id: account.id,
            email: account.email.clone(),
            roles: account.roles.clone(),
            token_version: account.token_version,
        }
    }

    /// Same subject with a different embedded version
    pub fn with_version(mut self, token_version: i64) -> Self {
        self.token_version = token_version;
        self
    }
}

/// Token pair (access + refresh)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token (short-lived)
    pub access_token: String,
    /// Refresh token (long-lived)
    pub refresh_token: String,
    /// Access token expiration (Unix timestamp)
    pub access_expires_at: i64,
    /// Refresh token expiration (Unix timestamp)
    pub refresh_expires_at: i64,
    /// Token type (always "Bearer")
    pub token_type: String,
}

/// JWT service for token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    fn generate_token(
        &self,
        subject: &TokenSubject,
        token_type: TokenType,
        lifetime: Duration,
    ) -> Result<(String, i64), JwtError> {
        let now = Utc::now();
        let exp = now + lifetime;

        let claims = Claims {
            sub: subject.account_id.to_string(),
            email: subject.email.clone(),
            roles: subject.roles.clone(),
            token_version: subject.token_version,
            token_type,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?;

        Ok((token, exp.timestamp()))
    }

    /// Generate an access token
    pub fn generate_access_token(&self, subject: &TokenSubject) -> Result<(String, i64), JwtError> {
        self.generate_token(
            subject,
            TokenType::Access,
            Duration::minutes(self.config.access_token_expiration_minutes),
        )
    }

    /// Generate a refresh token
    pub fn generate_refresh_token(
        &self,
        subject: &TokenSubject,
    ) -> Result<(String, i64), JwtError> {
        self.generate_token(
            subject,
            TokenType::Refresh,
            Duration::days(self.config.refresh_token_expiration_days),
        )
    }

    /// Generate both access and refresh tokens
    pub fn generate_token_pair(&self, subject: &TokenSubject) -> Result<TokenPair, JwtError> {
        let (access_token, access_expires_at) = self.generate_access_token(subject)?;
        let (refresh_token, refresh_expires_at) = self.generate_refresh_token(subject)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        // Strict expiration checking
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;

        Ok(token_data.claims)
    }

    /// Validate an access token specifically
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;

        if !claims.is_access_token() {
            return Err(JwtError::InvalidTokenType);
        }

        Ok(claims)
    }

    /// Validate a refresh token specifically
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;

        if !claims.is_refresh_token() {
            return Err(JwtError::InvalidTokenType);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> JwtService {
        let config = JwtConfig::new("test_secret_key_for_testing_only_32bytes!");
        JwtService::new(config)
    }

    fn subject(version: i64) -> TokenSubject {
        TokenSubject {
            account_id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            roles: vec![Role::User],
            token_version: version,
        }
    }

    // ========================================================================
    // JwtConfig Tests
    // ========================================================================

    #[test]
    fn test_jwt_config_new() {
        let config = JwtConfig::new("my_secret");

        assert_eq!(config.secret, "my_secret");
        assert_eq!(config.access_token_expiration_minutes, 15);
        assert_eq!(config.refresh_token_expiration_days, 7);
        assert_eq!(config.issuer, "storefront");
    }

    #[test]
    fn test_jwt_config_builder() {
        let config = JwtConfig::new("secret")
            .access_token_expiration(30)
            .refresh_token_expiration(14)
            .issuer("shop");

        assert_eq!(config.access_token_expiration_minutes, 30);
        assert_eq!(config.refresh_token_expiration_days, 14);
        assert_eq!(config.issuer, "shop");
    }

    #[test]
    fn test_jwt_config_debug_redacts_secret() {
        let config = JwtConfig::new("very_secret_value");
        let debug = format!("{:?}", config);

        assert!(!debug.contains("very_secret_value"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_token_type_serialization() {
        assert_eq!(
            serde_json::to_string(&TokenType::Access).unwrap(),
            r#""access""#
        );
        assert_eq!(
            serde_json::to_string(&TokenType::Refresh).unwrap(),
            r#""refresh""#
        );
        assert_eq!(TokenType::Refresh.to_string(), "refresh");
    }

    // ========================================================================
    // JWT Service Tests
    // ========================================================================

    #[test]
    fn test_generate_token_pair() {
        let service = create_test_service();

        let pair = service.generate_token_pair(&subject(0)).unwrap();

        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        assert_ne!(pair.access_token, pair.refresh_token);
        assert_eq!(pair.token_type, "Bearer");
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }

    #[test]
    fn test_access_token_expires_in_fifteen_minutes() {
        let service = create_test_service();
        let (_, exp) = service.generate_access_token(&subject(0)).unwrap();

        let expected = (Utc::now() + Duration::minutes(15)).timestamp();
        assert!((exp - expected).abs() <= 2);
    }

    #[test]
    fn test_claims_carry_version_and_roles() {
        let service = create_test_service();
        let subject = subject(4);
        let pair = service.generate_token_pair(&subject).unwrap();

        let access = service.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(access.token_version, 4);
        assert_eq!(access.roles, vec![Role::User]);
        assert_eq!(access.account_id().unwrap(), subject.account_id);
        assert_eq!(access.email, "a@x.com");

        let refresh = service.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.token_version, 4);
    }

    #[test]
    fn test_with_version_overrides_embedded_version() {
        let service = create_test_service();
        let subject = subject(1).with_version(2);
        let (token, _) = service.generate_access_token(&subject).unwrap();

        assert_eq!(service.validate_token(&token).unwrap().token_version, 2);
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let service = create_test_service();
        let pair = service.generate_token_pair(&subject(0)).unwrap();

        assert!(matches!(
            service.validate_access_token(&pair.refresh_token),
            Err(JwtError::InvalidTokenType)
        ));
        assert!(matches!(
            service.validate_refresh_token(&pair.access_token),
            Err(JwtError::InvalidTokenType)
        ));
    }

    #[test]
    fn test_validate_garbage_is_malformed() {
        let service = create_test_service();

        assert!(matches!(
            service.validate_token("not-a-jwt"),
            Err(JwtError::Malformed)
        ));
        assert!(service.validate_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let service1 = JwtService::new(JwtConfig::new("secret_one"));
        let service2 = JwtService::new(JwtConfig::new("secret_two"));

        let (token, _) = service1.generate_access_token(&subject(0)).unwrap();

        let result = service2.validate_token(&token);
        assert!(matches!(result, Err(JwtError::InvalidToken)));
    }

    #[test]
    fn test_validate_token_wrong_issuer() {
        let service1 = JwtService::new(JwtConfig::new("shared").issuer("one"));
        let service2 = JwtService::new(JwtConfig::new("shared").issuer("two"));

        let (token, _) = service1.generate_access_token(&subject(0)).unwrap();

        assert!(matches!(
            service2.validate_token(&token),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_token_contains_unique_jti() {
        let service = create_test_service();
        let subject = subject(0);

        let (token1, _) = service.generate_access_token(&subject).unwrap();
        let (token2, _) = service.generate_access_token(&subject).unwrap();

        let claims1 = service.validate_token(&token1).unwrap();
        let claims2 = service.validate_token(&token2).unwrap();
        assert_ne!(claims1.jti, claims2.jti);
    }

    #[test]
    fn test_expired_token() {
        let config = JwtConfig::new("test_secret").access_token_expiration(-1);
        let service = JwtService::new(config);

        let (token, _) = service.generate_access_token(&subject(0)).unwrap();

        let result = service.validate_token(&token);
        assert!(
            matches!(result, Err(JwtError::Expired)),
            "Expected Expired error, got: {:?}",
            result
        );
    }

    #[test]
    fn test_jwt_error_display() {
        assert_eq!(format!("{}", JwtError::Expired), "Token expired");
        assert_eq!(format!("{}", JwtError::InvalidToken), "Invalid token");
    }
}
