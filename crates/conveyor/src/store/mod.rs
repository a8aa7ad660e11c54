//! Narrow persistence contracts for sync state.
//!
//! All mutation of subscriptions and per-repository sync state flows
//! through this module. Every write here is idempotent under message
//! re-delivery: repeating an update against the same cursor leaves the
//! rows as they were.

pub mod errors;
pub mod repo_sync;
pub mod server_apps;
pub mod subscriptions;

pub use errors::{Result, StoreError};
