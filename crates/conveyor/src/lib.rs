//! Conveyor - synchronizes development data between two platforms.
//!
//! Conveyor consumes jobs from a durable, at-least-once message queue
//! and drives long-running, resumable backfills of repository data from
//! a GitHub-style source into a Jira-style sink. The hard parts live
//! here: the queue consumer (lease management, failure classification,
//! preemptive rate limiting, single-flight listening) and the backfill
//! orchestrator (persisted cursors, full vs. partial re-sync,
//! crash-safe one-page-at-a-time progress).
//!
//! The platforms themselves - the source and sink HTTP clients, the
//! queue service, the metrics backend, the feature-flag service - are
//! external collaborators consumed through narrow port traits.
//!
//! # Features
//!
//! - `migrate` - Enables database migration support. When enabled, use
//!   [`connect_and_migrate`] to run migrations on connection.
//!
//! # Example
//!
//! ```ignore
//! use conveyor::{connect_and_migrate, sync};
//!
//! let db = connect_and_migrate("sqlite://conveyor.db?mode=rwc").await?;
//!
//! // Kick off a full backfill for a subscription.
//! sync::find_or_start_sync(&db, &queue, &flags, &cloud_app, &subscription,
//!     Some(sync::SyncType::Full), None, None, Default::default()).await?;
//! ```

pub mod db;
pub mod entity;
pub mod flags;
pub mod metrics;
pub mod platform;
pub mod queue;
pub mod queues;
pub mod store;
pub mod sync;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use flags::{DefaultFlags, Flags, SharedFlags};
pub use metrics::{MetricsSink, NoopMetrics, SharedMetrics};
pub use queue::{QueueConsumer, QueueSettings};
pub use store::StoreError;
