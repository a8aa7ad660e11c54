//! Narrow update contracts for subscription rows.
//!
//! The orchestrator mutates subscription sync state exclusively through
//! these functions; each is a single idempotent UPDATE so re-delivered
//! messages can safely repeat it.

use sea_orm::sea_query::{Expr, Func};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Value};

use crate::entity::prelude::{SubscriptionColumn as Column, SyncStatus, TaskStatus};
use crate::entity::subscription::{self, Entity as Subscription};

use super::errors::Result;

/// Look up the subscription for one (host, installation, app) triple.
pub async fn get_single_installation(
    db: &DatabaseConnection,
    jira_host: &str,
    installation_id: i64,
    github_app_id: Option<i64>,
) -> Result<Option<subscription::Model>> {
    let mut query = Subscription::find()
        .filter(Column::JiraHost.eq(jira_host))
        .filter(Column::GithubInstallationId.eq(installation_id));

    query = match github_app_id {
        Some(id) => query.filter(Column::GithubAppId.eq(id)),
        None => query.filter(Column::GithubAppId.is_null()),
    };

    Ok(query.one(db).await?)
}

/// Mark a sync as started: status PENDING, synced-repo counter reset,
/// warning cleared.
pub async fn start_pending(db: &DatabaseConnection, subscription_id: i64) -> Result<()> {
    Subscription::update_many()
        .col_expr(Column::SyncStatus, Expr::value(SyncStatus::Pending))
        .col_expr(Column::NumberOfSyncedRepos, Expr::value(0i64))
        .col_expr(Column::SyncWarning, Expr::value(Value::String(None)))
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Reset the repository-discovery task.
///
/// Clears the status always; a full reset also wipes the cursor and the
/// total repo count so discovery restarts from the first page.
pub async fn reset_repository_task(
    db: &DatabaseConnection,
    subscription_id: i64,
    full: bool,
) -> Result<()> {
    let mut update = Subscription::update_many()
        .col_expr(Column::RepositoryStatus, Expr::value(Value::String(None)));

    if full {
        update = update
            .col_expr(Column::RepositoryCursor, Expr::value(Value::String(None)))
            .col_expr(
                Column::TotalNumberOfRepos,
                Expr::value(Value::BigInt(None)),
            );
    }

    update
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Record the total repository count reported by the source platform.
pub async fn set_total_number_of_repos(
    db: &DatabaseConnection,
    subscription_id: i64,
    total: i64,
) -> Result<()> {
    Subscription::update_many()
        .col_expr(Column::TotalNumberOfRepos, Expr::value(total))
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Advance the repository-discovery cursor.
pub async fn update_repository_cursor(
    db: &DatabaseConnection,
    subscription_id: i64,
    cursor: Option<&str>,
) -> Result<()> {
    Subscription::update_many()
        .col_expr(
            Column::RepositoryCursor,
            Expr::value(Value::String(cursor.map(|c| Box::new(c.to_string())))),
        )
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Set the repository-discovery status.
pub async fn mark_repository_status(
    db: &DatabaseConnection,
    subscription_id: i64,
    status: TaskStatus,
) -> Result<()> {
    Subscription::update_many()
        .col_expr(Column::RepositoryStatus, Expr::value(status))
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Persist the backfill horizon carried by the current sync.
pub async fn set_backfill_since_date(
    db: &DatabaseConnection,
    subscription_id: i64,
    since: Option<sea_orm::prelude::DateTimeWithTimeZone>,
) -> Result<()> {
    Subscription::update_many()
        .col_expr(Column::BackfillSinceDate, Expr::value(since))
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Record the terminal state of a sync run.
pub async fn finish_sync(
    db: &DatabaseConnection,
    subscription_id: i64,
    status: SyncStatus,
    warning: Option<String>,
) -> Result<()> {
    Subscription::update_many()
        .col_expr(Column::SyncStatus, Expr::value(status))
        .col_expr(
            Column::SyncWarning,
            Expr::value(Value::String(warning.map(Box::new))),
        )
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Bump the synced-repository counter by one.
pub async fn increment_synced_repos(db: &DatabaseConnection, subscription_id: i64) -> Result<()> {
    Subscription::update_many()
        .col_expr(
            Column::NumberOfSyncedRepos,
            Expr::expr(Func::coalesce([
                Expr::col(Column::NumberOfSyncedRepos).into(),
                Expr::val(0i64).into(),
            ]))
            .add(1i64),
        )
        .filter(Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn subscription_model(id: i64, github_app_id: Option<i64>) -> subscription::Model {
        let now = Utc::now().fixed_offset();
        subscription::Model {
            id,
            github_installation_id: 4242,
            jira_host: "https://example.atlassian.net".to_string(),
            github_app_id,
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

    fn exec_ok() -> MockExecResult {
        MockExecResult {
            rows_affected: 1,
            last_insert_id: 0,
        }
    }

    #[tokio::test]
    async fn get_single_installation_returns_matching_row() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([vec![subscription_model(7, None)]])
            .into_connection();

        let found =
            get_single_installation(&db, "https://example.atlassian.net", 4242, None)
                .await
                .expect("query should succeed");
        assert_eq!(found.map(|s| s.id), Some(7));
    }

    #[tokio::test]
    async fn get_single_installation_returns_none_when_missing() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([Vec::<subscription::Model>::new()])
            .into_connection();

        let found =
            get_single_installation(&db, "https://example.atlassian.net", 4242, Some(3))
                .await
                .expect("query should succeed");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn start_pending_issues_one_update() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok()])
            .into_connection();

        start_pending(&db, 7).await.expect("update should succeed");

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn reset_repository_task_full_wipes_cursor_and_total() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok()])
            .into_connection();

        reset_repository_task(&db, 7, true)
            .await
            .expect("update should succeed");

        let log = db.into_transaction_log();
        let statement = format!("{:?}", log[0]);
        assert!(statement.contains("repository_cursor"));
        assert!(statement.contains("total_number_of_repos"));
    }

    #[tokio::test]
    async fn reset_repository_task_partial_keeps_cursor() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok()])
            .into_connection();

        reset_repository_task(&db, 7, false)
            .await
            .expect("update should succeed");

        let log = db.into_transaction_log();
        let statement = format!("{:?}", log[0]);
        assert!(statement.contains("repository_status"));
        assert!(!statement.contains("repository_cursor"));
    }

    #[tokio::test]
    async fn increment_synced_repos_coalesces_null_counter() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec_ok()])
            .into_connection();

        increment_synced_repos(&db, 7)
            .await
            .expect("update should succeed");

        let log = db.into_transaction_log();
        let statement = format!("{:?}", log[0]).to_lowercase();
        assert!(statement.contains("coalesce"));
    }
}
