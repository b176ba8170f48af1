//! Account persistence
//!
//! [`AccountStore`] is the seam the auth service talks to; the PostgreSQL and
//! in-memory implementations live behind it.

pub mod account;
pub mod memory;

pub use account::{AccountStore, AccountStoreError, PgAccountStore, hash_token};
pub use memory::MemoryAccountStore;
