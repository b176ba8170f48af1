//! Database models for the storefront session service
//!
//! This module defines the account entity, its PostgreSQL row mapping and the
//! public view returned by the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Role
// ============================================================================

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parse a stored role name. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Account Model
// ============================================================================

/// Account entity with its session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Monotonic counter embedded in every issued token
    pub token_version: i64,
    /// SHA-256 hex of the single currently valid refresh token
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub roles: Vec<Role>,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub reset_code_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code_expires_at: Option<DateTime<Utc>>,
    /// Wrong guesses against the pending reset code
    #[serde(skip_serializing)]
    pub reset_attempts: i32,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Raw `accounts` row; roles are stored as a text array
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub token_version: i64,
    pub refresh_token_hash: Option<String>,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub reset_code_hash: Option<String>,
    pub reset_code_expires_at: Option<DateTime<Utc>>,
    pub reset_attempts: i32,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        let roles = row
            .roles
            .iter()
            .filter_map(|r| {
                let role = Role::parse(r);
                if role.is_none() {
                    tracing::warn!(account_id = %row.id, role = %r, "Ignoring unknown stored role");
                }
                role
            })
            .collect();

        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            phone: row.phone,
            password_hash: row.password_hash,
            token_version: row.token_version,
            refresh_token_hash: row.refresh_token_hash,
            roles,
            is_active: row.is_active,
            reset_code_hash: row.reset_code_hash,
            reset_code_expires_at: row.reset_code_expires_at,
            reset_attempts: row.reset_attempts,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Account data for creation (password already hashed)
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub roles: Vec<Role>,
}

/// Account without sensitive data (for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            name: account.name,
            phone: account.phone,
            roles: account.roles,
            is_active: account.is_active,
            created_at: account.created_at,
        }
    }
}
