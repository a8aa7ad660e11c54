//! External platform interfaces.
//!
//! Conveyor moves data between two platforms it does not own: a
//! GitHub-style source it backfills from and a Jira-style sink it
//! writes to. Both are consumed through the narrow port traits in
//! [`types`]; failures arrive as the tagged variants in [`errors`] so
//! the queue's error-handler pipeline can classify them without
//! inspecting wire-level details.

pub mod errors;
pub mod rate_limit;
pub mod types;

pub use errors::{SinkError, SinkResult, SourceError, SourceResult, UNRETRYABLE_STATUS_CODES};
pub use rate_limit::{ApiRateLimiter, SOURCE_DEFAULT_RPS};
pub use types::{
    AppConfig, QuotaBucket, RateLimitSnapshot, RepositoryPage, SinkClient, SourceClient,
    SourceClientProvider, SourceRepository,
};
