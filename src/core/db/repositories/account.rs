//! Account store
//!
//! The [`AccountStore`] trait is the persistence seam for accounts and their
//! session state (token version and current refresh token hash). Every
//! session mutation is a single conditional write so concurrent requests for
//! the same account cannot interleave between check and update.
//!
//! [`PgAccountStore`] implements it over PostgreSQL with SQLx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{Account, AccountRow, NewAccount};

const ACCOUNT_COLUMNS: &str = "id, email, name, phone, password_hash, token_version, \
     refresh_token_hash, roles, is_active, reset_code_hash, reset_code_expires_at, \
     reset_attempts, deleted_at, created_at, updated_at";

/// Account store error types
#[derive(Debug, thiserror::Error)]
pub enum AccountStoreError {
    #[error("Account not found")]
    NotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Hash a token or one-time code using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persistence for accounts and their session state.
///
/// Lookups never return soft-removed accounts. Emails are expected to be
/// normalized (lower-cased) by the caller.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account with `token_version = 0` and no refresh token.
    async fn create(&self, account: &NewAccount) -> Result<Account, AccountStoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AccountStoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountStoreError>;

    async fn find_by_refresh_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, AccountStoreError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Account>, AccountStoreError>;

    /// Overwrite the stored refresh token hash if the version still equals
    /// `expected_version`. The version itself is untouched.
    ///
    /// Returns false when the account is gone or the version moved.
    async fn store_refresh_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expected_version: i64,
    ) -> Result<bool, AccountStoreError>;

    /// Compare-and-swap rotation: replace the refresh token hash and bump the
    /// version only if both still equal the expected values.
    ///
    /// Returns `None` when the account is gone or the comparison failed.
    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
        new_hash: &str,
    ) -> Result<Option<Account>, AccountStoreError>;

    /// Compare-and-swap logout: clear the refresh token and bump the version
    /// only if both still equal the expected values.
    async fn revoke_refresh_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
    ) -> Result<Option<Account>, AccountStoreError>;

    /// Clear the refresh token and bump the version unconditionally.
    async fn revoke_sessions(&self, id: Uuid) -> Result<Account, AccountStoreError>;

    /// Replace the password hash and clear any pending reset code. When
    /// `revoke` is set the refresh token is cleared and the version bumped in
    /// the same write.
    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        revoke: bool,
    ) -> Result<Account, AccountStoreError>;

    /// Store a fresh reset code and zero the failed attempt counter.
    async fn set_reset_code(
        &self,
        id: Uuid,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AccountStoreError>;

    /// Check a guess against the pending, unexpired reset code.
    ///
    /// A miss counts as a failed attempt; the `max_attempts`-th miss clears
    /// the code. A hit leaves the code in place for [`update_password`] to
    /// clear. Returns false for a miss or when no live code exists.
    ///
    /// [`update_password`]: AccountStore::update_password
    async fn check_reset_code(
        &self,
        id: Uuid,
        code_hash: &str,
        max_attempts: i32,
    ) -> Result<bool, AccountStoreError>;

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Account, AccountStoreError>;

    /// Mark the account removed. Returns false if it was already gone.
    async fn soft_delete(&self, id: Uuid) -> Result<bool, AccountStoreError>;
}

/// PostgreSQL account store
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Create a new account store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a live account whose `column` equals `value`
    async fn fetch_live_by_text(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Account>, AccountStoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Account::from))
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, account: &NewAccount) -> Result<Account, AccountStoreError> {
        if self.find_by_email(&account.email).await?.is_some() {
            return Err(AccountStoreError::EmailAlreadyExists);
        }

        let roles: Vec<String> = account.roles.iter().map(|r| r.as_str().to_string()).collect();
        let sql = format!(
            r#"
            INSERT INTO accounts (email, name, phone, password_hash, roles)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&account.email)
            .bind(&account.name)
            .bind(&account.phone)
            .bind(&account.password_hash)
            .bind(&roles)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AccountStoreError::EmailAlreadyExists
                }
                other => AccountStoreError::DatabaseError(other),
            })?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AccountStoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountStoreError> {
        self.fetch_live_by_text("email", email).await
    }

    async fn find_by_refresh_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, AccountStoreError> {
        self.fetch_live_by_text("refresh_token_hash", token_hash)
            .await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Account>, AccountStoreError> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn store_refresh_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expected_version: i64,
    ) -> Result<bool, AccountStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET refresh_token_hash = $2
            WHERE id = $1 AND token_version = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
        new_hash: &str,
    ) -> Result<Option<Account>, AccountStoreError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET refresh_token_hash = $4, token_version = token_version + 1
            WHERE id = $1
              AND refresh_token_hash = $2
              AND token_version = $3
              AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .bind(expected_hash)
            .bind(expected_version)
            .bind(new_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn revoke_refresh_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
    ) -> Result<Option<Account>, AccountStoreError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET refresh_token_hash = NULL, token_version = token_version + 1
            WHERE id = $1
              AND refresh_token_hash = $2
              AND token_version = $3
              AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .bind(expected_hash)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn revoke_sessions(&self, id: Uuid) -> Result<Account, AccountStoreError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET refresh_token_hash = NULL, token_version = token_version + 1
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountStoreError::NotFound)?;

        Ok(row.into())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        revoke: bool,
    ) -> Result<Account, AccountStoreError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET
                password_hash = $2,
                reset_code_hash = NULL,
                reset_code_expires_at = NULL,
                reset_attempts = 0,
                refresh_token_hash = CASE WHEN $3 THEN NULL ELSE refresh_token_hash END,
                token_version = CASE WHEN $3 THEN token_version + 1 ELSE token_version END
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .bind(password_hash)
            .bind(revoke)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountStoreError::NotFound)?;

        Ok(row.into())
    }

    async fn set_reset_code(
        &self,
        id: Uuid,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AccountStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET reset_code_hash = $2, reset_code_expires_at = $3, reset_attempts = 0
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(code_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccountStoreError::NotFound);
        }

        Ok(())
    }

    async fn check_reset_code(
        &self,
        id: Uuid,
        code_hash: &str,
        max_attempts: i32,
    ) -> Result<bool, AccountStoreError> {
        // SET sees the old row, RETURNING the new one
        let matched = sqlx::query_scalar::<_, bool>(
            r#"
            UPDATE accounts
            SET
                reset_attempts = CASE
                    WHEN reset_code_hash = $2 THEN reset_attempts
                    ELSE reset_attempts + 1
                END,
                reset_code_hash = CASE
                    WHEN reset_code_hash = $2 OR reset_attempts + 1 < $3 THEN reset_code_hash
                    ELSE NULL
                END,
                reset_code_expires_at = CASE
                    WHEN reset_code_hash = $2 OR reset_attempts + 1 < $3 THEN reset_code_expires_at
                    ELSE NULL
                END
            WHERE id = $1
              AND deleted_at IS NULL
              AND reset_code_hash IS NOT NULL
              AND reset_code_expires_at > NOW()
            RETURNING COALESCE(reset_code_hash = $2, FALSE)
            "#,
        )
        .bind(id)
        .bind(code_hash)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(matched.unwrap_or(false))
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Account, AccountStoreError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET is_active = $2
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .bind(is_active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountStoreError::NotFound)?;

        Ok(row.into())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, AccountStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET deleted_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::models::Role;
    use crate::core::db::{DbConfig, create_pool_with_migrations};

    // ========================================================================
    // Token Hashing Tests (don't require database)
    // ========================================================================

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let hash = hash_token("refresh-token");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_token_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[test]
    fn test_hash_token_known_vector() {
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(AccountStoreError::NotFound.to_string(), "Account not found");
        assert_eq!(
            AccountStoreError::EmailAlreadyExists.to_string(),
            "Email already exists"
        );
    }

    // ========================================================================
    // Integration Tests (require real database)
    // ========================================================================

    async fn pg_store() -> PgAccountStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let config = DbConfig::new(url);
        let pool = create_pool_with_migrations(&config)
            .await
            .expect("Failed to create pool");
        PgAccountStore::new(pool)
    }

    fn new_account() -> NewAccount {
        NewAccount {
            email: format!("{}@example.com", Uuid::new_v4()),
            name: "Test".to_string(),
            phone: None,
            password_hash: "$2b$04$placeholder".to_string(),
            roles: vec![Role::User],
        }
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pg_rotate_is_compare_and_swap() {
        let store = pg_store().await;
        let account = store.create(&new_account()).await.unwrap();
        assert!(store.store_refresh_token(account.id, "old", 0).await.unwrap());

        let rotated = store
            .rotate_refresh_token(account.id, "old", 0, "new")
            .await
            .unwrap()
            .expect("first rotation wins");
        assert_eq!(rotated.token_version, 1);

        let lost = store
            .rotate_refresh_token(account.id, "old", 0, "other")
            .await
            .unwrap();
        assert!(lost.is_none());
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pg_revoke_refresh_token_is_compare_and_swap() {
        let store = pg_store().await;
        let account = store.create(&new_account()).await.unwrap();
        store.store_refresh_token(account.id, "rt", 0).await.unwrap();

        let first = store.revoke_refresh_token(account.id, "rt", 0).await.unwrap();
        assert_eq!(first.unwrap().token_version, 1);

        let second = store.revoke_refresh_token(account.id, "rt", 0).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pg_store_refresh_token_checks_version() {
        let store = pg_store().await;
        let account = store.create(&new_account()).await.unwrap();
        store.revoke_sessions(account.id).await.unwrap();

        assert!(!store.store_refresh_token(account.id, "rt", 0).await.unwrap());
        assert!(store.store_refresh_token(account.id, "rt", 1).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pg_reset_code_burns_after_max_attempts() {
        let store = pg_store().await;
        let account = store.create(&new_account()).await.unwrap();
        let expires_at = Utc::now() + chrono::Duration::minutes(15);
        store.set_reset_code(account.id, "code", expires_at).await.unwrap();

        for _ in 0..3 {
            assert!(!store.check_reset_code(account.id, "miss", 3).await.unwrap());
        }
        assert!(!store.check_reset_code(account.id, "code", 3).await.unwrap());

        store.set_reset_code(account.id, "code", expires_at).await.unwrap();
        assert!(!store.check_reset_code(account.id, "miss", 3).await.unwrap());
        assert!(store.check_reset_code(account.id, "code", 3).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pg_soft_delete_hides_account() {
        let store = pg_store().await;
        let account = store.create(&new_account()).await.unwrap();

        assert!(store.soft_delete(account.id).await.unwrap());
        assert!(store.find_by_id(account.id).await.unwrap().is_none());
        assert!(!store.soft_delete(account.id).await.unwrap());
    }
}
