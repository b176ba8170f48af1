//! Core domain: accounts, sessions and configuration

pub mod auth;
pub mod config;
pub mod db;
