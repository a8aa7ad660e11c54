//! Concrete queue payloads and per-queue configuration constants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::platform::AppConfig;
use crate::queue::MessagePayload;
use crate::sync::types::{SyncType, TaskType};

/// Queue carrying backfill jobs.
pub const BACKFILL_QUEUE: &str = "backfill";
/// Queue carrying push webhook jobs.
pub const PUSH_QUEUE: &str = "push";
/// Queue carrying deployment webhook jobs.
pub const DEPLOYMENT_QUEUE: &str = "deployment";

/// Queues guarded by the preemptive rate-limit check. Only backfill
/// jobs hammer the source API hard enough to warrant it.
pub const RATE_LIMIT_GUARDED_QUEUES: [&str; 1] = [BACKFILL_QUEUE];

/// Queues whose messages are worthless once stale and get pruned
/// unread.
pub const STALE_PRUNABLE_QUEUES: [&str; 1] = [DEPLOYMENT_QUEUE];

/// Metric bucket for a backfill horizon, so dashboards can group syncs
/// by how far back they reach.
pub fn backfill_from_date_bucket(from_date: Option<DateTime<Utc>>) -> &'static str {
    let Some(from_date) = from_date else {
        return "all-time";
    };
    let age = Utc::now().signed_duration_since(from_date);
    if age.num_days() <= 31 {
        "less-than-a-month"
    } else if age.num_days() <= 366 {
        "less-than-a-year"
    } else {
        "more-than-a-year"
    }
}

/// One backfill job: sync one subscription, one page at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillMessagePayload {
    pub installation_id: i64,
    pub jira_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_type: Option<SyncType>,
    /// When this sync generation was started.
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commits_from_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_commits_from_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tasks: Option<Vec<TaskType>>,
    #[serde(rename = "gitHubAppConfig")]
    pub github_app_config: AppConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metric_tags: BTreeMap<String, String>,
    /// Set when the rate-limit guard rescheduled this payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
}

impl MessagePayload for BackfillMessagePayload {
    fn jira_host(&self) -> &str {
        &self.jira_host
    }

    fn installation_id(&self) -> Option<i64> {
        Some(self.installation_id)
    }

    fn app_config(&self) -> Option<&AppConfig> {
        Some(&self.github_app_config)
    }

    fn mark_rate_limited(&mut self) {
        self.rate_limited = Some(true);
    }
}

/// A repository as carried by push jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRepository {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub full_name: String,
    pub url: String,
}

/// A commit sha with the issue keys parsed from its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaWithIssueKeys {
    pub id: String,
    pub issue_keys: Vec<String>,
}

/// One push job: submit the issue-linked commits of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessagePayload {
    pub repository: PushRepository,
    pub shas: Vec<ShaWithIssueKeys>,
    pub jira_host: String,
    pub installation_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    /// Epoch milliseconds the originating webhook was received at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_received: Option<i64>,
    #[serde(rename = "gitHubAppConfig")]
    pub github_app_config: AppConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
}

impl MessagePayload for PushMessagePayload {
    fn jira_host(&self) -> &str {
        &self.jira_host
    }

    fn installation_id(&self) -> Option<i64> {
        Some(self.installation_id)
    }

    fn app_config(&self) -> Option<&AppConfig> {
        Some(&self.github_app_config)
    }

    fn webhook_received(&self) -> Option<i64> {
        self.webhook_received
    }

    fn mark_rate_limited(&mut self) {
        self.rate_limited = Some(true);
    }
}

/// One deployment job. Deployment events age badly, so this queue is
/// stale-prunable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMessagePayload {
    pub jira_host: String,
    pub installation_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    /// Epoch milliseconds the originating webhook was received at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_received: Option<i64>,
    /// The deployment event body, passed through to the handler.
    pub webhook_payload: serde_json::Value,
    #[serde(rename = "gitHubAppConfig")]
    pub github_app_config: AppConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
}

impl MessagePayload for DeploymentMessagePayload {
    fn jira_host(&self) -> &str {
        &self.jira_host
    }

    fn installation_id(&self) -> Option<i64> {
        Some(self.installation_id)
    }

    fn app_config(&self) -> Option<&AppConfig> {
        Some(&self.github_app_config)
    }

    fn webhook_received(&self) -> Option<i64> {
        self.webhook_received
    }

    fn mark_rate_limited(&mut self) {
        self.rate_limited = Some(true);
    }
}
