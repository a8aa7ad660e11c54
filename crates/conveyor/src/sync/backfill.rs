//! The backfill state machine.
//!
//! Each backfill message advances one subscription by exactly one page:
//! pick the next unit of work, run its task processor, persist the
//! advanced cursor, and enqueue a continuation message. Crashing
//! anywhere loses at most one page of progress, which the idempotent
//! persistence makes safe to repeat.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::entity::prelude::{SyncStatus, TaskStatus};
use crate::entity::{repo_sync_state, subscription};
use crate::flags::SharedFlags;
use crate::metrics::SharedMetrics;
use crate::platform::{ApiRateLimiter, SOURCE_DEFAULT_RPS, SinkClient, SourceClientProvider};
use crate::queue::{
    HandlerError, MessageContext, MessageHandler, MetricsErrorHandler, PlatformErrorHandler,
    QueueConsumer, QueueSettings, QueueTransport, RateLimitGuard,
};
use crate::queues::{BACKFILL_QUEUE, BackfillMessagePayload};
use crate::store;

use super::discovery::RepositoryDiscovery;
use super::types::{DEFAULT_PAGE_SIZE, TaskContext, TaskType};

/// The next unit of work for a subscription.
enum NextWork {
    /// Repository discovery still has pages.
    Discovery { cursor: Option<String> },
    /// A per-repository task has runnable work.
    RepoTask {
        row: repo_sync_state::Model,
        task: TaskType,
        cursor: Option<String>,
    },
    /// Nothing left.
    Done,
}

fn row_task_status(row: &repo_sync_state::Model, task: TaskType) -> Option<TaskStatus> {
    match task {
        TaskType::Pull => row.pull_status.clone(),
        TaskType::Commit => row.commit_status.clone(),
        TaskType::Branch => row.branch_status.clone(),
        TaskType::Build => row.build_status.clone(),
        TaskType::Deployment => row.deployment_status.clone(),
        TaskType::Repository => None,
    }
}

fn row_task_cursor(row: &repo_sync_state::Model, task: TaskType) -> Option<String> {
    match task {
        TaskType::Pull => row.pull_cursor.clone(),
        TaskType::Commit => row.commit_cursor.clone(),
        TaskType::Branch => row.branch_cursor.clone(),
        TaskType::Build => row.build_cursor.clone(),
        TaskType::Deployment => row.deployment_cursor.clone(),
        TaskType::Repository => None,
    }
}

fn is_runnable(status: &Option<TaskStatus>) -> bool {
    matches!(status, None | Some(TaskStatus::Pending))
}

/// Failure code persisted when a task gives up.
fn failure_code(error: &HandlerError) -> String {
    if let Some(status) = error.status() {
        return status.to_string();
    }
    match error {
        HandlerError::Timeout => "TIMEOUT".to_string(),
        HandlerError::Source(err) if err.is_rate_limited() => "RATE_LIMITED".to_string(),
        HandlerError::Store(_) => "DATABASE_ERROR".to_string(),
        _ => "CONNECTION_ERROR".to_string(),
    }
}

/// Message handler driving backfills, one page per delivery.
pub struct BackfillHandler {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn SourceClientProvider>,
    sink: Arc<dyn SinkClient>,
    limiter: ApiRateLimiter,
    processors: HashMap<TaskType, Arc<dyn super::types::TaskProcessor>>,
    page_size: u32,
    /// The queue continuation messages go back onto; wired after the
    /// consumer is built since each owns a handle to the other.
    continuation: OnceLock<QueueConsumer<BackfillMessagePayload>>,
}

impl BackfillHandler {
    /// Create a handler with repository discovery registered and the
    /// default page size and request pacing.
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn SourceClientProvider>,
        sink: Arc<dyn SinkClient>,
    ) -> Self {
        let mut processors: HashMap<TaskType, Arc<dyn super::types::TaskProcessor>> =
            HashMap::new();
        processors.insert(TaskType::Repository, Arc::new(RepositoryDiscovery));

        Self {
            db,
            provider,
            sink,
            limiter: ApiRateLimiter::new(SOURCE_DEFAULT_RPS),
            processors,
            page_size: DEFAULT_PAGE_SIZE,
            continuation: OnceLock::new(),
        }
    }

    /// Register a task processor, replacing any previous one for the
    /// same task type.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn super::types::TaskProcessor>) -> Self {
        self.processors.insert(processor.task_type(), processor);
        self
    }

    /// Override the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Wire the queue continuation messages are sent to. Called once
    /// during assembly.
    pub fn attach_queue(&self, queue: QueueConsumer<BackfillMessagePayload>) {
        let _ = self.continuation.set(queue);
    }

    /// The per-repository tasks this payload targets.
    fn repo_targets(payload: &BackfillMessagePayload) -> Vec<TaskType> {
        match &payload.target_tasks {
            Some(tasks) if !tasks.is_empty() => tasks
                .iter()
                .copied()
                .filter(|t| *t != TaskType::Repository)
                .collect(),
            _ => TaskType::REPO_TASKS.to_vec(),
        }
    }

    /// Whether this payload wants repository discovery run at all.
    fn discovery_targeted(payload: &BackfillMessagePayload) -> bool {
        payload
            .target_tasks
            .as_ref()
            .is_none_or(|tasks| tasks.is_empty() || tasks.contains(&TaskType::Repository))
    }

    async fn next_work(
        &self,
        subscription: &subscription::Model,
        payload: &BackfillMessagePayload,
    ) -> Result<NextWork, HandlerError> {
        if Self::discovery_targeted(payload)
            && subscription.repository_status != Some(TaskStatus::Complete)
        {
            return Ok(NextWork::Discovery {
                cursor: subscription.repository_cursor.clone(),
            });
        }

        let targets = Self::repo_targets(payload);
        if targets.is_empty() {
            return Ok(NextWork::Done);
        }

        let rows =
            store::repo_sync::find_next_incomplete(&self.db, subscription.id, &targets, 1).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(NextWork::Done);
        };

        let task = targets
            .iter()
            .copied()
            .find(|t| is_runnable(&row_task_status(&row, *t)));
        match task {
            Some(task) => {
                let cursor = row_task_cursor(&row, task);
                Ok(NextWork::RepoTask { row, task, cursor })
            }
            // The row matched the query but every target moved on in
            // the meantime; the next delivery re-evaluates.
            None => Ok(NextWork::Done),
        }
    }

    /// Enqueue a continuation carrying the same logical payload.
    async fn enqueue_continuation(
        &self,
        payload: &BackfillMessagePayload,
    ) -> Result<(), HandlerError> {
        let Some(queue) = self.continuation.get() else {
            return Err(HandlerError::unexpected(
                "backfill handler has no continuation queue attached",
            ));
        };
        queue
            .send_message(payload, Duration::ZERO)
            .await
            .map_err(|err| {
                HandlerError::unexpected(format!("failed to enqueue continuation: {err}"))
            })?;
        Ok(())
    }

    /// Record a terminal failure before the message is given up on.
    async fn record_terminal_failure(
        &self,
        subscription: &subscription::Model,
        work: &NextWork,
        error: &HandlerError,
    ) {
        let code = failure_code(error);
        let outcome = match work {
            NextWork::Discovery { .. } => {
                let status = store::subscriptions::mark_repository_status(
                    &self.db,
                    subscription.id,
                    TaskStatus::Failed,
                )
                .await;
                let finish = store::subscriptions::finish_sync(
                    &self.db,
                    subscription.id,
                    SyncStatus::Failed,
                    Some(format!("repository discovery failed: {code}")),
                )
                .await;
                status.and(finish)
            }
            NextWork::RepoTask { row, task, .. } => {
                store::repo_sync::set_failed_code(
                    &self.db,
                    subscription.id,
                    row.repo_id,
                    *task,
                    &code,
                )
                .await
            }
            NextWork::Done => Ok(()),
        };

        if let Err(record_err) = outcome {
            tracing::warn!(
                error = %record_err,
                original_error = %error,
                "Failed to record terminal task failure"
            );
        }
    }

    /// Persist the page's outcome and decide whether more work remains.
    async fn persist_page(
        &self,
        subscription: &subscription::Model,
        work: &NextWork,
        page: &super::types::TaskPage,
        targets: &[TaskType],
    ) -> Result<(), HandlerError> {
        match work {
            NextWork::Discovery { .. } => {
                if page.has_next_page {
                    store::subscriptions::update_repository_cursor(
                        &self.db,
                        subscription.id,
                        page.next_cursor.as_deref(),
                    )
                    .await?;
                    store::subscriptions::mark_repository_status(
                        &self.db,
                        subscription.id,
                        TaskStatus::Pending,
                    )
                    .await?;
                } else {
                    store::subscriptions::mark_repository_status(
                        &self.db,
                        subscription.id,
                        TaskStatus::Complete,
                    )
                    .await?;
                }
            }
            NextWork::RepoTask { row, task, .. } => {
                if page.has_next_page {
                    store::repo_sync::update_task_cursor(
                        &self.db,
                        subscription.id,
                        row.repo_id,
                        *task,
                        page.next_cursor.as_deref(),
                    )
                    .await?;
                } else {
                    store::repo_sync::mark_task_status(
                        &self.db,
                        subscription.id,
                        row.repo_id,
                        *task,
                        TaskStatus::Complete,
                    )
                    .await?;

                    let others_remaining = targets
                        .iter()
                        .any(|t| *t != *task && is_runnable(&row_task_status(row, *t)));
                    if !others_remaining {
                        store::subscriptions::increment_synced_repos(&self.db, subscription.id)
                            .await?;
                    }
                }
            }
            NextWork::Done => {}
        }
        Ok(())
    }

    /// Close out a finished sync, surfacing per-repo failures as a
    /// warning.
    async fn finish(&self, subscription: &subscription::Model) -> Result<(), HandlerError> {
        let failed = store::repo_sync::count_failed(&self.db, subscription.id).await?;
        let warning = (failed > 0).then(|| format!("{failed} repositories failed to sync"));

        store::subscriptions::finish_sync(&self.db, subscription.id, SyncStatus::Complete, warning)
            .await?;
        tracing::info!(
            subscription_id = subscription.id,
            failed_repos = failed,
            "Backfill complete"
        );
        Ok(())
    }

    async fn run(&self, context: &MessageContext<BackfillMessagePayload>) -> Result<(), HandlerError> {
        let payload = &context.payload;

        let subscription = store::subscriptions::get_single_installation(
            &self.db,
            &payload.jira_host,
            payload.installation_id,
            payload.github_app_config.github_app_id,
        )
        .await?;
        let Some(subscription) = subscription else {
            tracing::warn!(
                jira_host = %payload.jira_host,
                installation_id = payload.installation_id,
                "Subscription has been removed, dropping backfill message"
            );
            return Ok(());
        };

        let work = self.next_work(&subscription, payload).await?;
        let (task_type, repository) = match &work {
            NextWork::Discovery { .. } => (TaskType::Repository, None),
            NextWork::RepoTask { row, task, .. } => (*task, Some(row)),
            NextWork::Done => return self.finish(&subscription).await,
        };

        let Some(processor) = self.processors.get(&task_type) else {
            // No processor registered for this entity type; skip it so
            // the rest of the sync can finish.
            tracing::warn!(task = %task_type, "No task processor registered, marking complete");
            if let NextWork::RepoTask { row, task, .. } = &work {
                store::repo_sync::mark_task_status(
                    &self.db,
                    subscription.id,
                    row.repo_id,
                    *task,
                    TaskStatus::Complete,
                )
                .await?;
            }
            return self.enqueue_continuation(payload).await;
        };

        let source = self
            .provider
            .client_for(payload.installation_id, &payload.github_app_config)
            .await?;

        let cursor = match &work {
            NextWork::Discovery { cursor } => cursor.clone(),
            NextWork::RepoTask { cursor, .. } => cursor.clone(),
            NextWork::Done => None,
        };

        let task_context = TaskContext {
            db: &self.db,
            source: source.as_ref(),
            subscription: &subscription,
            payload,
            repository,
        };

        // Pace upstream calls; sustained pressure is the guard's job.
        self.limiter.wait().await;

        match processor
            .process_page(&task_context, cursor, self.page_size)
            .await
        {
            Ok(page) => {
                let targets = Self::repo_targets(payload);
                self.persist_page(&subscription, &work, &page, &targets)
                    .await?;

                if let Some(sink_payload) = page.sink_payload.clone() {
                    self.sink.submit_dev_info(sink_payload).await?;
                }

                // One page per delivery: whatever remains is picked up
                // by the continuation.
                self.enqueue_continuation(payload).await
            }
            Err(err) => {
                if context.last_attempt {
                    self.record_terminal_failure(&subscription, &work, &err).await;
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MessageHandler<BackfillMessagePayload> for BackfillHandler {
    async fn handle(
        &self,
        context: &MessageContext<BackfillMessagePayload>,
    ) -> Result<(), HandlerError> {
        self.run(context).await
    }
}

/// Assemble the backfill queue: consumer, error pipeline with the
/// failed-metric decorator, preemptive rate-limit guard, and the
/// handler's continuation wiring.
pub fn backfill_queue(
    settings: QueueSettings,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<BackfillHandler>,
    metrics: SharedMetrics,
    flags: SharedFlags,
    provider: Arc<dyn SourceClientProvider>,
) -> QueueConsumer<BackfillMessagePayload> {
    let error_handler = MetricsErrorHandler::new(
        PlatformErrorHandler,
        BACKFILL_QUEUE,
        Arc::clone(&metrics),
    );
    let guard = Arc::new(RateLimitGuard::new(provider, Arc::clone(&flags)));

    let consumer = QueueConsumer::new(
        settings,
        transport,
        handler.clone(),
        Arc::new(error_handler),
    )
    .with_metrics(metrics)
    .with_flags(flags)
    .with_rate_limit_guard(guard);

    handler.attach_queue(consumer.clone());
    consumer
}
