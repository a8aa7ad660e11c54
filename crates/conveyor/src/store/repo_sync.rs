//! Narrow contracts for per-repository sync state rows.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Value,
};

use crate::entity::prelude::{RepoSyncStateColumn as Column, TaskStatus};
use crate::entity::repo_sync_state::{self, ActiveModel, Entity as RepoSyncState};
use crate::sync::types::TaskType;

use super::errors::{Result, StoreError, is_retryable_error};

/// Retry attempts for the discovery bulk upsert.
const BULK_UPSERT_RETRIES: usize = 3;

/// Initial backoff for bulk upsert retries.
const BULK_UPSERT_MIN_DELAY: Duration = Duration::from_millis(100);

/// Backoff ceiling for bulk upsert retries.
const BULK_UPSERT_MAX_DELAY: Duration = Duration::from_secs(5);

/// The cursor/status column pair for a per-repository task.
///
/// Repository discovery has no columns here; its state lives on the
/// subscription row.
fn task_columns(task: TaskType) -> Option<(Column, Column)> {
    match task {
        TaskType::Pull => Some((Column::PullCursor, Column::PullStatus)),
        TaskType::Commit => Some((Column::CommitCursor, Column::CommitStatus)),
        TaskType::Branch => Some((Column::BranchCursor, Column::BranchStatus)),
        TaskType::Build => Some((Column::BuildCursor, Column::BuildStatus)),
        TaskType::Deployment => Some((Column::DeploymentCursor, Column::DeploymentStatus)),
        TaskType::Repository => None,
    }
}

fn repo_task_columns(task: TaskType) -> Result<(Column, Column)> {
    task_columns(task).ok_or_else(|| StoreError::InvalidInput {
        message: "repository discovery state lives on the subscription row".to_string(),
    })
}

/// Delete every state row belonging to a subscription.
///
/// Used by untargeted full syncs: no stale per-repo state survives the
/// restart.
pub async fn delete_from_subscription(
    db: &DatabaseConnection,
    subscription_id: i64,
) -> Result<u64> {
    let result = RepoSyncState::delete_many()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Reset the given per-repository tasks across all of a subscription's
/// rows.
///
/// Status columns are always nulled; cursors only on a full sync, so a
/// partial sync resumes from where each task left off.
pub async fn reset_task_fields(
    db: &DatabaseConnection,
    subscription_id: i64,
    tasks: &[TaskType],
    full: bool,
) -> Result<()> {
    let columns: Vec<(Column, Column)> = tasks.iter().filter_map(|t| task_columns(*t)).collect();
    if columns.is_empty() {
        return Ok(());
    }

    let mut update = RepoSyncState::update_many().col_expr(
        Column::RepoUpdatedAt,
        Expr::value(Value::ChronoDateTimeWithTimeZone(None)),
    );

    for (cursor_col, status_col) in columns {
        update = update.col_expr(status_col, Expr::value(Value::String(None)));
        if full {
            update = update.col_expr(cursor_col, Expr::value(Value::String(None)));
        }
    }

    update
        .filter(Column::SubscriptionId.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Clear the terminal failure marker on every row of a subscription.
///
/// Partial and targeted syncs resume past their own transient failures.
pub async fn clear_failed_codes(db: &DatabaseConnection, subscription_id: i64) -> Result<u64> {
    let result = RepoSyncState::update_many()
        .col_expr(Column::FailedCode, Expr::value(Value::String(None)))
        .filter(Column::SubscriptionId.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Build the ON CONFLICT clause for the discovery bulk upsert.
///
/// The natural key is (subscription_id, repo_id). Only repository
/// metadata is refreshed on conflict; task cursors and statuses are
/// never touched, so re-running a discovery page cannot clobber
/// progress.
fn build_upsert_on_conflict() -> OnConflict {
    OnConflict::columns([Column::SubscriptionId, Column::RepoId])
        .update_columns([
            Column::RepoName,
            Column::RepoOwner,
            Column::RepoFullName,
            Column::RepoUrl,
            Column::RepoUpdatedAt,
            Column::UpdatedAt,
        ])
        .to_owned()
}

/// Upsert a page of discovered repositories in one statement.
///
/// Returns the number of rows inserted or updated.
pub async fn bulk_upsert(db: &DatabaseConnection, models: Vec<ActiveModel>) -> Result<u64> {
    if models.is_empty() {
        return Ok(0);
    }

    RepoSyncState::insert_many(models)
        .on_conflict(build_upsert_on_conflict())
        .exec_without_returning(db)
        .await
        .map_err(StoreError::from)
}

/// Bulk upsert with retry on transient database errors.
pub async fn bulk_upsert_with_retry(
    db: &DatabaseConnection,
    models: Vec<ActiveModel>,
) -> Result<u64> {
    if models.is_empty() {
        return Ok(0);
    }

    tracing::debug!(count = models.len(), "Starting bulk upsert");

    let operation = || {
        let models = models.clone();
        async move { bulk_upsert(db, models).await }
    };

    operation
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(BULK_UPSERT_MIN_DELAY)
                .with_max_delay(BULK_UPSERT_MAX_DELAY)
                .with_max_times(BULK_UPSERT_RETRIES)
                .with_jitter(),
        )
        .when(is_retryable_error)
        .notify(|err, dur| {
            tracing::warn!(error = %err, backoff = ?dur, "Bulk upsert failed, retrying");
        })
        .await
}

/// Advance one task's cursor on one repository row.
pub async fn update_task_cursor(
    db: &DatabaseConnection,
    subscription_id: i64,
    repo_id: i64,
    task: TaskType,
    cursor: Option<&str>,
) -> Result<()> {
    let (cursor_col, status_col) = repo_task_columns(task)?;

    RepoSyncState::update_many()
        .col_expr(
            cursor_col,
            Expr::value(Value::String(cursor.map(|c| Box::new(c.to_string())))),
        )
        .col_expr(status_col, Expr::value(TaskStatus::Pending))
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::RepoId.eq(repo_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Set one task's status on one repository row.
pub async fn mark_task_status(
    db: &DatabaseConnection,
    subscription_id: i64,
    repo_id: i64,
    task: TaskType,
    status: TaskStatus,
) -> Result<()> {
    let (_, status_col) = repo_task_columns(task)?;

    RepoSyncState::update_many()
        .col_expr(status_col, Expr::value(status))
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::RepoId.eq(repo_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Record a terminal failure for one task on one repository row.
pub async fn set_failed_code(
    db: &DatabaseConnection,
    subscription_id: i64,
    repo_id: i64,
    task: TaskType,
    code: &str,
) -> Result<()> {
    let (_, status_col) = repo_task_columns(task)?;

    RepoSyncState::update_many()
        .col_expr(status_col, Expr::value(TaskStatus::Failed))
        .col_expr(
            Column::FailedCode,
            Expr::value(Value::String(Some(Box::new(code.to_string())))),
        )
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::RepoId.eq(repo_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Count rows where at least one task failed terminally.
pub async fn count_failed(db: &DatabaseConnection, subscription_id: i64) -> Result<u64> {
    use sea_orm::PaginatorTrait;

    let mut failed = Condition::any();
    for task in TaskType::REPO_TASKS {
        let Some((_, status_col)) = task_columns(task) else {
            continue;
        };
        failed = failed.add(status_col.eq(TaskStatus::Failed));
    }

    let count = RepoSyncState::find()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(failed)
        .count(db)
        .await?;
    Ok(count)
}

/// Fetch rows that still have runnable work for any of the given tasks.
///
/// A task is runnable while its status is NULL or pending. Rows come
/// back in id order so processing is deterministic across deliveries.
pub async fn find_next_incomplete(
    db: &DatabaseConnection,
    subscription_id: i64,
    tasks: &[TaskType],
    limit: u64,
) -> Result<Vec<repo_sync_state::Model>> {
    let mut runnable = Condition::any();
    for task in tasks {
        let Some((_, status_col)) = task_columns(*task) else {
            continue;
        };
        runnable = runnable.add(
            Condition::any()
                .add(status_col.is_null())
                .add(status_col.eq(TaskStatus::Pending)),
        );
    }

    let rows = RepoSyncState::find()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(runnable)
        .order_by_asc(Column::Id)
        .limit(limit)
        .all(db)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult, Set};

    fn active_model(subscription_id: i64, repo_id: i64, name: &str) -> ActiveModel {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            subscription_id: Set(subscription_id),
            repo_id: Set(repo_id),
            repo_name: Set(name.to_string()),
            repo_owner: Set("acme".to_string()),
            repo_full_name: Set(format!("acme/{name}")),
            repo_url: Set(format!("https://github.com/acme/{name}")),
            repo_updated_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
    }

    fn exec_ok(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            rows_affected,
            last_insert_id: 0,
        }
    }

    #[tokio::test]
    async fn bulk_upsert_returns_zero_for_empty_input() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let count = bulk_upsert(&db, Vec::new()).await.expect("should succeed");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn bulk_upsert_returns_rows_affected() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok(2)])
            .into_connection();

        let models = vec![active_model(1, 10, "a"), active_model(1, 11, "b")];
        let count = bulk_upsert(&db, models)
            .await
            .expect("bulk_upsert should succeed");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn bulk_upsert_with_retry_retries_transient_errors() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_errors([DbErr::Conn(sea_orm::RuntimeErr::Internal(
                "temporarily unavailable".to_string(),
            ))])
            .append_exec_results([exec_ok(1)])
            .into_connection();

        let models = vec![active_model(1, 10, "a")];
        let count = bulk_upsert_with_retry(&db, models)
            .await
            .expect("should succeed after retry");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn delete_from_subscription_returns_rows_affected() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok(5)])
            .into_connection();

        let deleted = delete_from_subscription(&db, 1)
            .await
            .expect("delete should succeed");
        assert_eq!(deleted, 5);
    }

    #[tokio::test]
    async fn reset_task_fields_full_nulls_cursors_and_statuses() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok(3)])
            .into_connection();

        reset_task_fields(&db, 1, &[TaskType::Pull, TaskType::Commit], true)
            .await
            .expect("update should succeed");

        let log = db.into_transaction_log();
        let statement = format!("{:?}", log[0]);
        assert!(statement.contains("pull_cursor"));
        assert!(statement.contains("pull_status"));
        assert!(statement.contains("commit_cursor"));
        assert!(statement.contains("commit_status"));
    }

    #[tokio::test]
    async fn reset_task_fields_partial_keeps_cursors() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok(3)])
            .into_connection();

        reset_task_fields(&db, 1, &[TaskType::Pull], false)
            .await
            .expect("update should succeed");

        let log = db.into_transaction_log();
        let statement = format!("{:?}", log[0]);
        assert!(statement.contains("pull_status"));
        assert!(!statement.contains("pull_cursor"));
    }

    #[tokio::test]
    async fn reset_task_fields_ignores_repository_only_input() {
        // Repository discovery state is not on these rows; nothing to do.
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        reset_task_fields(&db, 1, &[TaskType::Repository], true)
            .await
            .expect("no-op should succeed");
        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn update_task_cursor_rejects_repository_task() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let err = update_task_cursor(&db, 1, 10, TaskType::Repository, Some("c1"))
            .await
            .expect_err("repository task should be rejected");
        assert!(matches!(err, StoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn set_failed_code_marks_status_failed() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok(1)])
            .into_connection();

        set_failed_code(&db, 1, 10, TaskType::Pull, "CONNECTION_ERROR")
            .await
            .expect("update should succeed");

        let log = db.into_transaction_log();
        let statement = format!("{:?}", log[0]);
        assert!(statement.contains("failed_code"));
        assert!(statement.contains("pull_status"));
    }
}
