//! Database module for the storefront session service
//!
//! Connection pool setup, the account model and the account stores
//! (PostgreSQL via SQLx, and an in-memory fallback).

pub mod models;
pub mod pool;
pub mod repositories;

pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations, health_check};
pub use repositories::{
    AccountStore, AccountStoreError, MemoryAccountStore, PgAccountStore, hash_token,
};

pub use sqlx::PgPool;
