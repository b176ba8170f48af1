//! Storefront Auth - session token lifecycle for a storefront backend
//!
//! Account signup and login, short-lived access tokens, rotating refresh
//! cookies and per-account token versions for revocation, served over axum.

pub mod app;
pub mod core;
