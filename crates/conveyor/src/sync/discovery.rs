//! Repository discovery task processor.
//!
//! Walks the installation's repository list one page at a time,
//! creating the per-repo sync state rows every other task runs against.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::Set;

use crate::entity::repo_sync_state::ActiveModel;
use crate::queue::HandlerError;
use crate::store;

use super::types::{TaskContext, TaskPage, TaskProcessor, TaskType};

/// The discovery processor. Stateless; one instance serves all
/// subscriptions.
pub struct RepositoryDiscovery;

#[async_trait]
impl TaskProcessor for RepositoryDiscovery {
    fn task_type(&self) -> TaskType {
        TaskType::Repository
    }

    async fn process_page(
        &self,
        context: &TaskContext<'_>,
        cursor: Option<String>,
        per_page: u32,
    ) -> Result<TaskPage, HandlerError> {
        let payload = context.payload;
        let started = std::time::Instant::now();

        tracing::info!(backfill_task = "repository", "Backfill task started");

        // Re-check the subscription: it may have been removed while this
        // message sat on the queue.
        let subscription = store::subscriptions::get_single_installation(
            context.db,
            &payload.jira_host,
            payload.installation_id,
            payload.github_app_config.github_app_id,
        )
        .await?;

        let Some(subscription) = subscription else {
            tracing::warn!(
                jira_host = %payload.jira_host,
                installation_id = payload.installation_id,
                "Subscription has been removed, ignoring repository task"
            );
            return Ok(TaskPage::default());
        };

        let page = context
            .source
            .repositories_page(per_page, cursor.as_deref())
            .await?;

        store::subscriptions::set_total_number_of_repos(
            context.db,
            subscription.id,
            page.total_count,
        )
        .await?;

        let now = Utc::now().fixed_offset();
        let models: Vec<ActiveModel> = page
            .repositories
            .iter()
            .map(|repo| ActiveModel {
                subscription_id: Set(subscription.id),
                repo_id: Set(repo.id),
                repo_name: Set(repo.name.clone()),
                repo_owner: Set(repo.owner.clone()),
                repo_full_name: Set(repo.full_name.clone()),
                repo_url: Set(repo.url.clone()),
                repo_updated_at: Set(repo.updated_at.map(|d| d.fixed_offset())),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            })
            .collect();

        store::repo_sync::bulk_upsert_with_retry(context.db, models).await?;

        tracing::debug!(
            repositories_added = page.repositories.len(),
            has_next_page = page.has_next_page,
            total_count = page.total_count,
            next_cursor = ?page.end_cursor,
            "Repository discovery page information"
        );
        tracing::info!(
            processing_time_ms = started.elapsed().as_millis() as u64,
            repositories = page.repositories.len(),
            "Backfill task complete"
        );

        Ok(TaskPage {
            next_cursor: page.end_cursor,
            has_next_page: page.has_next_page,
            items_processed: page.repositories.len(),
            sink_payload: None,
        })
    }
}
