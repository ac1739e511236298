//! tenant_notes: multi-tenant notes service
//!
//! Tenants hold users and notes. Every note query is bound to the caller's
//! tenant, and free-plan tenants are capped at three notes until an admin
//! upgrades them to pro.
//!
//! Storage is Sled with Serde JSON records; the HTTP surface is Axum.

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod notes;
pub mod quota;
pub mod rate_limit;
// REST API module: Axum HTTP handlers, auth middleware, OpenAPI doc
pub mod rest;
pub mod storage;
pub mod tenants;
