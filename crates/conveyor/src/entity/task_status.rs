//! Per-task status enum used on repo sync state rows.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a single backfill task (one entity type on one repository).
///
/// A `NULL` column means the task has not been attempted in the current
/// sync generation; resetting a task's status back to pending is done by
/// nulling the column, not by writing `Pending`.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum TaskStatus {
    /// The task has started and has a persisted cursor.
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,
    /// All pages for this task have been processed.
    #[sea_orm(string_value = "complete")]
    Complete,
    /// The task hit a terminal error; `failed_code` carries the reason.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_outputs_expected_strings() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::Complete.to_string(), "complete");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }
}
