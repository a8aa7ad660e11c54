//! Subscription-level sync status enum.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Overall backfill status of a subscription.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum SyncStatus {
    /// A backfill has been requested and is in flight.
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,
    /// All tasks for all repositories finished.
    #[sea_orm(string_value = "complete")]
    Complete,
    /// The backfill gave up on at least one task.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Complete => write!(f, "complete"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_pending() {
        assert_eq!(SyncStatus::default(), SyncStatus::Pending);
    }

    #[test]
    fn display_outputs_expected_strings() {
        assert_eq!(SyncStatus::Pending.to_string(), "pending");
        assert_eq!(SyncStatus::Complete.to_string(), "complete");
        assert_eq!(SyncStatus::Failed.to_string(), "failed");
    }
}
