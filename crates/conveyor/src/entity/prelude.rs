//! Common re-exports for convenient entity usage.

pub use super::repo_sync_state::{
    ActiveModel as RepoSyncStateActiveModel, Column as RepoSyncStateColumn,
    Entity as RepoSyncState, Model as RepoSyncStateModel,
};
pub use super::server_app::{
    ActiveModel as ServerAppActiveModel, Column as ServerAppColumn, Entity as ServerApp,
    Model as ServerAppModel,
};
pub use super::subscription::{
    ActiveModel as SubscriptionActiveModel, Column as SubscriptionColumn, Entity as Subscription,
    Model as SubscriptionModel,
};
pub use super::sync_status::SyncStatus;
pub use super::task_status::TaskStatus;
