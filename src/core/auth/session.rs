//! Session state machine
//!
//! A session is the relationship between a presented token and the account
//! it names. The account's `token_version` is the only revocation record:
//!
//! ```text
//!             login                 rotate (refresh)
//! Anonymous ─────────► Active{v} ─────────────────► Active{v+1}
//!                         │
//!                         │ logout / admin revoke / password change
//!                         ▼
//!                  Revoked{presented: v, current: v+1}
//! ```
//!
//! [`SessionState::observe`] classifies a decoded token against the account's
//! current record; the transition functions compute the version the store
//! must write next.

use uuid::Uuid;

use crate::core::auth::jwt::Claims;
use crate::core::db::models::Account;

/// State of a session as seen by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential presented
    Anonymous,
    /// Credential version matches the account
    Active { account_id: Uuid, version: i64 },
    /// The account's version moved on since the credential was minted
    Revoked {
        account_id: Uuid,
        presented: i64,
        current: i64,
    },
}

/// A transition was requested from a state that does not allow it
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition: {action} from {from:?}")]
pub struct TransitionError {
    pub action: &'static str,
    pub from: SessionState,
}

impl SessionState {
    /// Classify a verified token against the account it names.
    ///
    /// The caller must already have matched `claims.sub` to `account.id`.
    pub fn observe(claims: &Claims, account: &Account) -> Self {
        if claims.token_version == account.token_version {
            SessionState::Active {
                account_id: account.id,
                version: account.token_version,
            }
        } else {
            SessionState::Revoked {
                account_id: account.id,
                presented: claims.token_version,
                current: account.token_version,
            }
        }
    }

    /// Anonymous → Active at the account's current version
    pub fn login(self, account: &Account) -> Result<Self, TransitionError> {
        match self {
            SessionState::Anonymous => Ok(SessionState::Active {
                account_id: account.id,
                version: account.token_version,
            }),
            other => Err(TransitionError {
                action: "login",
                from: other,
            }),
        }
    }

    /// Active{v} → Active{v+1}; the new pair is minted at `v+1`
    pub fn rotate(self) -> Result<Self, TransitionError> {
        match self {
            SessionState::Active {
                account_id,
                version,
            } => Ok(SessionState::Active {
                account_id,
                version: version + 1,
            }),
            other => Err(TransitionError {
                action: "rotate",
                from: other,
            }),
        }
    }

    /// Active{v} → Revoked{v, v+1}
    pub fn logout(self) -> Result<Self, TransitionError> {
        match self {
            SessionState::Active {
                account_id,
                version,
            } => Ok(SessionState::Revoked {
                account_id,
                presented: version,
                current: version + 1,
            }),
            other => Err(TransitionError {
                action: "logout",
                from: other,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }

    /// The version a token must carry to be accepted in this state
    pub fn version(&self) -> Option<i64> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Active { version, .. } => Some(*version),
            SessionState::Revoked { current, .. } => Some(*current),
        }
    }
}
