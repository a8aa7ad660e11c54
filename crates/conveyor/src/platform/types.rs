//! Port traits and shared types for the two external platforms.
//!
//! The concrete REST/GraphQL wire clients live outside this crate; the
//! core consumes them through these traits only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{SinkResult, SourceResult};

/// One rate-limit budget on the source platform.
#[derive(Debug, Clone, Copy)]
pub struct QuotaBucket {
    /// Maximum requests allowed per window.
    pub limit: u64,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

impl QuotaBucket {
    /// Percentage of the window already consumed, in `[0, 100]`.
    pub fn used_percent(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        let used = self.limit.saturating_sub(self.remaining);
        (used as f64 / self.limit as f64) * 100.0
    }
}

/// Snapshot of the source platform's two independent quota budgets.
///
/// REST and GraphQL calls draw from separate buckets but share the same
/// hourly reset cadence.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSnapshot {
    /// REST ("core") quota.
    pub core: QuotaBucket,
    /// GraphQL quota.
    pub graphql: QuotaBucket,
}

impl RateLimitSnapshot {
    /// The higher of the two buckets' usage percentages.
    pub fn max_used_percent(&self) -> f64 {
        self.core.used_percent().max(self.graphql.used_percent())
    }

    /// The later of the two buckets' reset times.
    pub fn latest_reset(&self) -> DateTime<Utc> {
        self.core.reset_at.max(self.graphql.reset_at)
    }
}

/// A repository as reported by the source platform's discovery page.
#[derive(Debug, Clone)]
pub struct SourceRepository {
    /// Platform-assigned numeric id.
    pub id: i64,
    /// Repository name.
    pub name: String,
    /// Owner login.
    pub owner: String,
    /// `owner/name`.
    pub full_name: String,
    /// Web URL.
    pub url: String,
    /// When the repository was last updated on the platform.
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of repository discovery results.
#[derive(Debug, Clone)]
pub struct RepositoryPage {
    /// Total repositories visible to the installation.
    pub total_count: i64,
    /// Whether another page follows this one.
    pub has_next_page: bool,
    /// Opaque cursor for the next page, if any.
    pub end_cursor: Option<String>,
    /// Repositories on this page.
    pub repositories: Vec<SourceRepository>,
}

/// App configuration embedded in every backfill job.
///
/// Cloud installations use the process-wide app; GitHub Enterprise
/// installations carry their server app's registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server-app row id, `None` for cloud.
    pub github_app_id: Option<i64>,
    /// App id on the GitHub side.
    pub app_id: i64,
    /// OAuth client id.
    pub client_id: String,
    /// Base web URL of the GitHub instance.
    pub base_url: String,
    /// API URL of the GitHub instance.
    pub api_url: String,
    /// Install-link UUID, `None` for cloud.
    pub uuid: Option<Uuid>,
}

/// Client for the source platform, scoped to one installation.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the current REST + GraphQL quota snapshot.
    async fn rate_limit(&self) -> SourceResult<RateLimitSnapshot>;

    /// Fetch one page of the installation's repositories.
    async fn repositories_page(
        &self,
        per_page: u32,
        cursor: Option<&str>,
    ) -> SourceResult<RepositoryPage>;
}

/// Constructs source clients for a given installation.
///
/// The queue consumer and the backfill handler both create clients from
/// message payloads, so construction is a port of its own.
#[async_trait]
pub trait SourceClientProvider: Send + Sync {
    /// Build a client for the installation described by the payload.
    async fn client_for(
        &self,
        installation_id: i64,
        app_config: &AppConfig,
    ) -> SourceResult<Arc<dyn SourceClient>>;
}

/// Client for the sink platform, scoped to one site.
#[async_trait]
pub trait SinkClient: Send + Sync {
    /// Submit a batch of development information to the sink.
    ///
    /// Submissions are idempotent on the sink side (keyed by remote
    /// entity ids), so re-delivery of the same page is safe.
    async fn submit_dev_info(&self, payload: serde_json::Value) -> SinkResult<()>;
}
