//! Authentication module for the storefront
//!
//! This module provides the session lifecycle:
//! - JWT access/refresh token generation and validation
//! - Credential verification and account registration
//! - Per-account token versions for rotation and revocation
//! - REST API endpoints and request extractors

pub mod api;
pub mod extract;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod service;
pub mod session;

pub use api::{AuthApiState, CookiePolicy, REFRESH_COOKIE, auth_api_router};
pub use extract::{AdminAccount, CurrentAccount};
pub use jwt::{Claims, JwtConfig, JwtError, JwtService, TokenPair, TokenSubject, TokenType};
pub use password::{DEFAULT_BCRYPT_COST, PasswordHasher};
pub use reset::{LogResetCodeSender, ResetCodeSender};
pub use service::{
    AuthError, AuthResponse, AuthService, LoginRequest, RegisterRequest, RequiredRole,
    SessionPolicy,
};
pub use session::SessionState;
