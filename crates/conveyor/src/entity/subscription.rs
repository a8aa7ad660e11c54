//! Subscription entity - one row per (Jira host, GitHub installation) pair.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::sync_status::SyncStatus;
use crate::entity::task_status::TaskStatus;

/// Subscription model - the unit a backfill runs against.
///
/// Repository discovery state (cursor, status, total count) lives here
/// rather than on per-repo rows because discovery is the task that
/// *creates* the per-repo rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    /// Internal primary key.
    #[sea_orm(primary_key)]
    pub id: i64,

    // ─── Identity ────────────────────────────────────────────────────────────
    /// GitHub App installation this subscription is bound to.
    pub github_installation_id: i64,
    /// Jira site receiving the synced data.
    pub jira_host: String,
    /// GitHub Enterprise server app, when not a cloud installation.
    pub github_app_id: Option<i64>,

    // ─── Sync State ──────────────────────────────────────────────────────────
    /// Overall backfill status.
    pub sync_status: Option<SyncStatus>,
    /// Human-readable warning surfaced to admins (cleared on restart).
    #[sea_orm(column_type = "Text", nullable)]
    pub sync_warning: Option<String>,
    /// Horizon the current backfill reaches back to.
    pub backfill_since_date: Option<DateTimeWithTimeZone>,

    // ─── Repository Discovery ────────────────────────────────────────────────
    /// Total repositories reported by the source platform.
    pub total_number_of_repos: Option<i64>,
    /// Repositories whose tasks have all completed.
    pub number_of_synced_repos: Option<i64>,
    /// Pagination cursor for the repository-discovery task.
    #[sea_orm(column_type = "Text", nullable)]
    pub repository_cursor: Option<String>,
    /// Status of the repository-discovery task.
    pub repository_status: Option<TaskStatus>,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A subscription owns its per-repository sync state rows.
    #[sea_orm(has_many = "super::repo_sync_state::Entity")]
    RepoSyncState,
}

impl Related<super::repo_sync_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RepoSyncState.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this subscription has ever completed (or even started
    /// recording) a backfill. A brand-new subscription adopts whatever
    /// horizon the first full sync requests.
    pub fn is_initial_sync(&self) -> bool {
        self.backfill_since_date.is_none() && self.repository_status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_subscription() -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: 1,
            github_installation_id: 4242,
            jira_host: "https://example.atlassian.net".to_string(),
            github_app_id: None,
            sync_status: None,
            sync_warning: None,
            backfill_since_date: None,
            total_number_of_repos: None,
            number_of_synced_repos: None,
            repository_cursor: None,
            repository_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_subscription_is_initial_sync() {
        assert!(make_subscription().is_initial_sync());
    }

    #[test]
    fn subscription_with_repository_status_is_not_initial() {
        let mut model = make_subscription();
        model.repository_status = Some(TaskStatus::Complete);
        assert!(!model.is_initial_sync());
    }

    #[test]
    fn subscription_with_since_date_is_not_initial() {
        let mut model = make_subscription();
        model.backfill_since_date = Some(Utc::now().fixed_offset());
        assert!(!model.is_initial_sync());
    }
}
