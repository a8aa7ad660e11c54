//! Starting (or restarting) a backfill for a subscription.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use thiserror::Error;

use crate::entity::subscription;
use crate::flags::Flags;
use crate::platform::AppConfig;
use crate::queue::{ConsumerError, QueueConsumer};
use crate::queues::{BackfillMessagePayload, backfill_from_date_bucket};
use crate::store::{self, StoreError};

use super::backfill_since::calc_new_backfill_since_date;
use super::types::{SyncType, TaskType};

/// The cloud app registration, from process settings. Enterprise
/// installations carry a server-app row instead.
#[derive(Debug, Clone)]
pub struct CloudAppSettings {
    pub app_id: i64,
    pub client_id: String,
    pub base_url: String,
    pub api_url: String,
}

impl CloudAppSettings {
    fn to_app_config(&self) -> AppConfig {
        AppConfig {
            github_app_id: None,
            app_id: self.app_id,
            client_id: self.client_id.clone(),
            base_url: self.base_url.clone(),
            api_url: self.api_url.clone(),
            uuid: None,
        }
    }
}

/// Errors from starting a sync.
#[derive(Debug, Error)]
pub enum SyncStartError {
    /// Sync-state persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The backfill job could not be enqueued.
    #[error(transparent)]
    Queue(#[from] ConsumerError),
}

/// Reset sync state for a subscription and enqueue a backfill job.
///
/// What gets reset depends on the sync shape:
/// - targeted tasks have their statuses cleared (cursors too on a full
///   sync) and everything else is left alone;
/// - an untargeted full sync wipes the subscription's repository
///   discovery state and deletes every per-repo row - a clean restart;
/// - every other shape clears `failed_code` markers so the sync can
///   resume past previous terminal failures.
///
/// Returns the id of the enqueued backfill message.
#[allow(clippy::too_many_arguments)]
pub async fn find_or_start_sync(
    db: &DatabaseConnection,
    queue: &QueueConsumer<BackfillMessagePayload>,
    flags: &dyn Flags,
    cloud_app: &CloudAppSettings,
    subscription: &subscription::Model,
    sync_type: Option<SyncType>,
    commits_from_date: Option<DateTime<Utc>>,
    target_tasks: Option<Vec<TaskType>>,
    metric_tags: BTreeMap<String, String>,
) -> Result<String, SyncStartError> {
    store::subscriptions::start_pending(db, subscription.id).await?;

    tracing::info!(
        subscription_id = subscription.id,
        sync_type = ?sync_type,
        "Starting sync"
    );

    let is_full = sync_type == Some(SyncType::Full);
    let targeted = target_tasks.as_ref().is_some_and(|tasks| !tasks.is_empty());

    if let Some(tasks) = target_tasks.as_deref().filter(|t| !t.is_empty()) {
        reset_targeted_tasks(db, subscription.id, tasks, is_full).await?;
    }

    if is_full && !targeted {
        // Full restart: no stale per-repo state survives.
        store::subscriptions::reset_repository_task(db, subscription.id, true).await?;
        store::repo_sync::delete_from_subscription(db, subscription.id).await?;
    } else {
        // Partial and targeted syncs resume past their own transient
        // failures.
        store::repo_sync::clear_failed_codes(db, subscription.id).await?;
    }

    let app_config = resolve_app_config(db, subscription, cloud_app).await?;

    let jira_host = subscription.jira_host.as_str();
    let main_commits_from_date = commit_since_date(
        commits_from_date,
        flags.main_commit_lookback(jira_host),
    );
    let branch_commits_from_date = commit_since_date(
        commits_from_date,
        flags.branch_commit_lookback(jira_host),
    );

    // Advance (or clear) the persisted horizon per the since-date rule.
    let new_horizon = calc_new_backfill_since_date(
        subscription
            .backfill_since_date
            .map(|d| d.with_timezone(&Utc)),
        main_commits_from_date,
        sync_type.unwrap_or(SyncType::Partial),
        subscription.is_initial_sync(),
    );
    store::subscriptions::set_backfill_since_date(
        db,
        subscription.id,
        new_horizon.map(|d| d.fixed_offset()),
    )
    .await?;

    let mut metric_tags = metric_tags;
    metric_tags.insert(
        "backfillFrom".to_string(),
        backfill_from_date_bucket(main_commits_from_date).to_string(),
    );
    metric_tags.insert(
        "syncType".to_string(),
        sync_type.map_or_else(|| "empty".to_string(), |t| t.to_string()),
    );

    let payload = BackfillMessagePayload {
        installation_id: subscription.github_installation_id,
        jira_host: subscription.jira_host.clone(),
        sync_type,
        start_time: Utc::now(),
        commits_from_date: main_commits_from_date,
        branch_commits_from_date,
        target_tasks,
        github_app_config: app_config,
        metric_tags,
        rate_limited: None,
    };

    let message_id = queue.send_message(&payload, Duration::ZERO).await?;
    Ok(message_id)
}

/// Clear state for the targeted tasks only.
///
/// Per-repo tasks reset on their rows; targeting "repository" resets the
/// discovery state held on the subscription itself.
async fn reset_targeted_tasks(
    db: &DatabaseConnection,
    subscription_id: i64,
    tasks: &[TaskType],
    full: bool,
) -> Result<(), StoreError> {
    store::repo_sync::reset_task_fields(db, subscription_id, tasks, full).await?;

    if tasks.contains(&TaskType::Repository) {
        store::subscriptions::reset_repository_task(db, subscription_id, full).await?;
    }
    Ok(())
}

/// The explicit since-date wins, else the per-host lookback window,
/// else no cutoff.
fn commit_since_date(
    explicit: Option<DateTime<Utc>>,
    lookback: Option<chrono::Duration>,
) -> Option<DateTime<Utc>> {
    explicit.or_else(|| lookback.map(|window| Utc::now() - window))
}

/// Cloud installations use the process-wide app; enterprise ones load
/// their server app row.
async fn resolve_app_config(
    db: &DatabaseConnection,
    subscription: &subscription::Model,
    cloud_app: &CloudAppSettings,
) -> Result<AppConfig, StoreError> {
    let Some(github_app_id) = subscription.github_app_id else {
        return Ok(cloud_app.to_app_config());
    };

    let server_app = store::server_apps::get_by_id(db, github_app_id).await?;
    Ok(AppConfig {
        github_app_id: Some(server_app.id),
        app_id: server_app.app_id,
        client_id: server_app.client_id,
        // Enterprise servers serve the API from the same host.
        api_url: server_app.base_url.clone(),
        base_url: server_app.base_url,
        uuid: Some(server_app.uuid),
    })
}
