//! RepoSyncState entity - per (subscription, repository) backfill progress.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::task_status::TaskStatus;

/// Per-repository sync state.
///
/// Rows are bulk-created during repository discovery, advanced one page
/// at a time by the task processors, and deleted wholesale when an
/// untargeted full sync restarts. Each task type carries its own
/// cursor/status pair so a partial sync can resume any of them
/// independently.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repo_sync_states")]
pub struct Model {
    /// Internal primary key.
    #[sea_orm(primary_key)]
    pub id: i64,

    // ─── Identity ────────────────────────────────────────────────────────────
    /// Owning subscription.
    pub subscription_id: i64,
    /// Repository id on the source platform.
    pub repo_id: i64,

    // ─── Repository Metadata ─────────────────────────────────────────────────
    pub repo_name: String,
    pub repo_owner: String,
    pub repo_full_name: String,
    #[sea_orm(column_type = "Text")]
    pub repo_url: String,
    /// When the repository itself was last updated on the source platform.
    pub repo_updated_at: Option<DateTimeWithTimeZone>,

    // ─── Task Progress ───────────────────────────────────────────────────────
    #[sea_orm(column_type = "Text", nullable)]
    pub pull_cursor: Option<String>,
    pub pull_status: Option<TaskStatus>,
    #[sea_orm(column_type = "Text", nullable)]
    pub commit_cursor: Option<String>,
    pub commit_status: Option<TaskStatus>,
    #[sea_orm(column_type = "Text", nullable)]
    pub branch_cursor: Option<String>,
    pub branch_status: Option<TaskStatus>,
    #[sea_orm(column_type = "Text", nullable)]
    pub build_cursor: Option<String>,
    pub build_status: Option<TaskStatus>,
    #[sea_orm(column_type = "Text", nullable)]
    pub deployment_cursor: Option<String>,
    pub deployment_status: Option<TaskStatus>,

    /// Terminal failure code from the last sync attempt, if any.
    pub failed_code: Option<String>,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each state row belongs to a subscription.
    #[sea_orm(
        belongs_to = "super::subscription::Entity",
        from = "Column::SubscriptionId",
        to = "super::subscription::Column::Id"
    )]
    Subscription,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether every per-repo task has completed.
    pub fn all_tasks_complete(&self) -> bool {
        [
            &self.pull_status,
            &self.commit_status,
            &self.branch_status,
            &self.build_status,
            &self.deployment_status,
        ]
        .iter()
        .all(|status| matches!(status, Some(TaskStatus::Complete)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_state() -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: 1,
            subscription_id: 1,
            repo_id: 99,
            repo_name: "widget".to_string(),
            repo_owner: "acme".to_string(),
            repo_full_name: "acme/widget".to_string(),
            repo_url: "https://github.com/acme/widget".to_string(),
            repo_updated_at: None,
            pull_cursor: None,
            pull_status: None,
            commit_cursor: None,
            commit_status: None,
            branch_cursor: None,
            branch_status: None,
            build_cursor: None,
            build_status: None,
            deployment_cursor: None,
            deployment_status: None,
            failed_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_state_is_not_complete() {
        assert!(!make_state().all_tasks_complete());
    }

    #[test]
    fn all_statuses_complete_means_repo_done() {
        let mut state = make_state();
        state.pull_status = Some(TaskStatus::Complete);
        state.commit_status = Some(TaskStatus::Complete);
        state.branch_status = Some(TaskStatus::Complete);
        state.build_status = Some(TaskStatus::Complete);
        state.deployment_status = Some(TaskStatus::Complete);
        assert!(state.all_tasks_complete());
    }

    #[test]
    fn one_pending_task_keeps_repo_incomplete() {
        let mut state = make_state();
        state.pull_status = Some(TaskStatus::Complete);
        state.commit_status = Some(TaskStatus::Pending);
        state.branch_status = Some(TaskStatus::Complete);
        state.build_status = Some(TaskStatus::Complete);
        state.deployment_status = Some(TaskStatus::Complete);
        assert!(!state.all_tasks_complete());
    }
}
