//! In-memory account store
//!
//! Backs the service when no `DATABASE_URL` is configured and drives the
//! test suites. Each mutation runs under the DashMap shard lock of the
//! account entry, which gives the same per-account atomicity as the
//! conditional `UPDATE`s of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::account::{AccountStore, AccountStoreError};
use crate::core::db::models::{Account, NewAccount};

/// Account store held entirely in process memory
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<Uuid, Account>,
    /// email -> id, live accounts only
    emails: DashMap<String, Uuid>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live accounts
    pub fn len(&self) -> usize {
        self.accounts
            .iter()
            .filter(|a| a.deleted_at.is_none())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to a live account under its entry lock
    fn mutate<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Account) -> T,
    ) -> Result<T, AccountStoreError> {
        let mut entry = self.live_entry(id).ok_or(AccountStoreError::NotFound)?;

        let out = f(&mut entry);
        entry.updated_at = Utc::now();
        Ok(out)
    }

    fn live_entry(
        &self,
        id: Uuid,
    ) -> Option<dashmap::mapref::one::RefMut<'_, Uuid, Account>> {
        self.accounts
            .get_mut(&id)
            .filter(|a| a.deleted_at.is_none())
    }

    /// Replace the refresh token (or clear it with `None`) and bump the
    /// version, if hash and version still match
    fn swap_session(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
        new_hash: Option<&str>,
    ) -> Result<Option<Account>, AccountStoreError> {
        let Some(mut entry) = self.live_entry(id) else {
            return Ok(None);
        };

        if entry.refresh_token_hash.as_deref() != Some(expected_hash)
            || entry.token_version != expected_version
        {
            return Ok(None);
        }

        entry.refresh_token_hash = new_hash.map(str::to_string);
        entry.token_version += 1;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    fn find_live(&self, predicate: impl Fn(&Account) -> bool) -> Option<Account> {
        self.accounts
            .iter()
            .find(|a| a.deleted_at.is_none() && predicate(a))
            .map(|a| a.clone())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, new: &NewAccount) -> Result<Account, AccountStoreError> {
        let id = Uuid::new_v4();

        // The email index entry is the uniqueness lock
        match self.emails.entry(new.email.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AccountStoreError::EmailAlreadyExists);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let now = Utc::now();
        let account = Account {
            id,
            email: new.email.clone(),
            name: new.name.clone(),
            phone: new.phone.clone(),
            password_hash: new.password_hash.clone(),
            token_version: 0,
            refresh_token_hash: None,
            roles: new.roles.clone(),
            is_active: true,
            reset_code_hash: None,
            reset_code_expires_at: None,
            reset_attempts: 0,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AccountStoreError> {
        Ok(self
            .accounts
            .get(&id)
            .filter(|a| a.deleted_at.is_none())
            .map(|a| a.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountStoreError> {
        let Some(id) = self.emails.get(email).map(|id| *id) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn find_by_refresh_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, AccountStoreError> {
        Ok(self.find_live(|a| a.refresh_token_hash.as_deref() == Some(token_hash)))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Account>, AccountStoreError> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .filter(|a| a.deleted_at.is_none())
            .map(|a| a.clone())
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(accounts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn store_refresh_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expected_version: i64,
    ) -> Result<bool, AccountStoreError> {
        let Some(mut entry) = self.live_entry(id) else {
            return Ok(false);
        };

        if entry.token_version != expected_version {
            return Ok(false);
        }

        entry.refresh_token_hash = Some(token_hash.to_string());
        entry.updated_at = Utc::now();
        Ok(true)
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
        new_hash: &str,
    ) -> Result<Option<Account>, AccountStoreError> {
        self.swap_session(id, expected_hash, expected_version, Some(new_hash))
    }

    async fn revoke_refresh_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        expected_version: i64,
    ) -> Result<Option<Account>, AccountStoreError> {
        self.swap_session(id, expected_hash, expected_version, None)
    }

    async fn revoke_sessions(&self, id: Uuid) -> Result<Account, AccountStoreError> {
        self.mutate(id, |a| {
            a.refresh_token_hash = None;
            a.token_version += 1;
            a.clone()
        })
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        revoke: bool,
    ) -> Result<Account, AccountStoreError> {
        self.mutate(id, |a| {
            a.password_hash = password_hash.to_string();
            a.reset_code_hash = None;
            a.reset_code_expires_at = None;
            a.reset_attempts = 0;
            if revoke {
                a.refresh_token_hash = None;
                a.token_version += 1;
            }
            a.clone()
        })
    }

    async fn set_reset_code(
        &self,
        id: Uuid,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AccountStoreError> {
        self.mutate(id, |a| {
            a.reset_code_hash = Some(code_hash.to_string());
            a.reset_code_expires_at = Some(expires_at);
            a.reset_attempts = 0;
        })
    }

    async fn check_reset_code(
        &self,
        id: Uuid,
        code_hash: &str,
        max_attempts: i32,
    ) -> Result<bool, AccountStoreError> {
        let Some(mut entry) = self.live_entry(id) else {
            return Ok(false);
        };

        let live = matches!(
            (&entry.reset_code_hash, entry.reset_code_expires_at),
            (Some(_), Some(expires_at)) if expires_at > Utc::now()
        );
        if !live {
            return Ok(false);
        }

        if entry.reset_code_hash.as_deref() == Some(code_hash) {
            return Ok(true);
        }

        entry.reset_attempts += 1;
        if entry.reset_attempts >= max_attempts {
            entry.reset_code_hash = None;
            entry.reset_code_expires_at = None;
        }
        entry.updated_at = Utc::now();
        Ok(false)
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Account, AccountStoreError> {
        self.mutate(id, |a| {
            a.is_active = is_active;
            a.clone()
        })
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, AccountStoreError> {
        let email = match self.mutate(id, |a| {
            a.deleted_at = Some(Utc::now());
            a.email.clone()
        }) {
            Ok(email) => email,
            Err(AccountStoreError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };

        // Free the address for a future signup
        self.emails.remove_if(&email, |_, owner| *owner == id);
        Ok(true)
    }
}
