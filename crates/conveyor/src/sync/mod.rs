//! Backfill orchestration.
//!
//! A backfill walks one subscription's object graph - repositories
//! first, then each repository's entity types - one page per queue
//! message, with cursors persisted after every page so a crash or
//! restart resumes instead of restarting.
//!
//! # Module Structure
//!
//! - [`types`] - `SyncType`, `TaskType`, the `TaskProcessor` contract
//! - [`backfill_since`] - the since-date decision rule
//! - [`starter`] - `find_or_start_sync`: state resets + job enqueue
//! - [`discovery`] - the repository discovery processor
//! - [`backfill`] - the per-message state machine and queue assembly

pub mod backfill;
pub mod backfill_since;
pub mod discovery;
pub mod starter;
pub mod types;

pub use backfill::{BackfillHandler, backfill_queue};
pub use backfill_since::calc_new_backfill_since_date;
pub use discovery::RepositoryDiscovery;
pub use starter::{CloudAppSettings, SyncStartError, find_or_start_sync};
pub use types::{
    DEFAULT_PAGE_SIZE, SyncType, Task, TaskContext, TaskPage, TaskProcessor, TaskType,
};
