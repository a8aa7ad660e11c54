//! Shared types for the backfill orchestration.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::entity::{repo_sync_state, subscription};
use crate::platform::SourceClient;
use crate::queue::HandlerError;
use crate::queues::BackfillMessagePayload;

/// Repositories fetched per discovery/task page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Full rebuilds everything; partial resumes from persisted cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Partial,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncType::Full => write!(f, "full"),
            SyncType::Partial => write!(f, "partial"),
        }
    }
}

/// The entity types a backfill works through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Repository discovery; lives on the subscription, creates the
    /// per-repo rows the other tasks run against.
    Repository,
    Pull,
    Commit,
    Branch,
    Build,
    Deployment,
}

impl TaskType {
    /// The per-repository tasks, in processing order.
    pub const REPO_TASKS: [TaskType; 5] = [
        TaskType::Pull,
        TaskType::Branch,
        TaskType::Commit,
        TaskType::Build,
        TaskType::Deployment,
    ];
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Repository => write!(f, "repository"),
            TaskType::Pull => write!(f, "pull"),
            TaskType::Commit => write!(f, "commit"),
            TaskType::Branch => write!(f, "branch"),
            TaskType::Build => write!(f, "build"),
            TaskType::Deployment => write!(f, "deployment"),
        }
    }
}

/// One unit of resumable work the orchestrator schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Entity type to fetch.
    pub task: TaskType,
    /// Repository the task runs against; 0 for repository discovery,
    /// which spans the whole installation.
    pub repository_id: i64,
    /// Cursor to resume from, if any.
    pub cursor: Option<String>,
}

/// Result of processing one page of a task.
#[derive(Debug, Clone, Default)]
pub struct TaskPage {
    /// Cursor marking the page boundary just processed.
    pub next_cursor: Option<String>,
    /// Whether another page remains.
    pub has_next_page: bool,
    /// Entities handled on this page.
    pub items_processed: usize,
    /// Payload to submit to the sink, when the page produced one.
    pub sink_payload: Option<serde_json::Value>,
}

/// Everything a task processor needs for one page.
pub struct TaskContext<'a> {
    /// Sync-state database.
    pub db: &'a DatabaseConnection,
    /// Source platform client for this installation.
    pub source: &'a dyn SourceClient,
    /// The subscription being backfilled.
    pub subscription: &'a subscription::Model,
    /// The backfill job payload driving this run.
    pub payload: &'a BackfillMessagePayload,
    /// The repository the task targets; `None` for repository
    /// discovery.
    pub repository: Option<&'a repo_sync_state::Model>,
}

/// Pluggable page fetcher for one entity type.
///
/// Given a cursor and page size, a processor fetches one page from the
/// source, persists what it found (idempotent upserts keyed by remote
/// id), and reports the advanced cursor. The orchestrator owns
/// re-enqueueing a continuation while pages remain and marking the task
/// complete when they don't.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// The entity type this processor handles.
    fn task_type(&self) -> TaskType;

    /// Fetch and persist one page.
    async fn process_page(
        &self,
        context: &TaskContext<'_>,
        cursor: Option<String>,
        per_page: u32,
    ) -> std::result::Result<TaskPage, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SyncType::Full).unwrap(), "\"full\"");
        assert_eq!(
            serde_json::to_string(&SyncType::Partial).unwrap(),
            "\"partial\""
        );
    }

    #[test]
    fn task_type_round_trips_through_json() {
        for task in [
            TaskType::Repository,
            TaskType::Pull,
            TaskType::Commit,
            TaskType::Branch,
            TaskType::Build,
            TaskType::Deployment,
        ] {
            let json = serde_json::to_string(&task).unwrap();
            assert_eq!(json, format!("\"{task}\""));
            let back: TaskType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, task);
        }
    }

    #[test]
    fn repo_tasks_exclude_repository_discovery() {
        assert!(!TaskType::REPO_TASKS.contains(&TaskType::Repository));
        assert_eq!(TaskType::REPO_TASKS.len(), 5);
    }
}
