//! Initial migration to create the conveyor database schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_server_apps(manager).await?;
        self.create_subscriptions(manager).await?;
        self.create_repo_sync_states(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RepoSyncStates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ServerApps::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_server_apps(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServerApps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServerApps::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServerApps::AppId).big_integer().not_null())
                    .col(
                        ColumnDef::new(ServerApps::Uuid)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ServerApps::ClientId).string().not_null())
                    .col(ColumnDef::new(ServerApps::BaseUrl).text().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn create_subscriptions(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    // Identity
                    .col(
                        ColumnDef::new(Subscriptions::GithubInstallationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Subscriptions::JiraHost).string().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::GithubAppId)
                            .big_integer()
                            .null(),
                    )
                    // Sync state
                    .col(ColumnDef::new(Subscriptions::SyncStatus).string().null())
                    .col(ColumnDef::new(Subscriptions::SyncWarning).text().null())
                    .col(
                        ColumnDef::new(Subscriptions::BackfillSinceDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Repository discovery
                    .col(
                        ColumnDef::new(Subscriptions::TotalNumberOfRepos)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::NumberOfSyncedRepos)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::RepositoryCursor)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::RepositoryStatus)
                            .string()
                            .null(),
                    )
                    // Tracking
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_host_installation")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::JiraHost)
                    .col(Subscriptions::GithubInstallationId)
                    .to_owned(),
            )
            .await
    }

    async fn create_repo_sync_states(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RepoSyncStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RepoSyncStates::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    // Identity
                    .col(
                        ColumnDef::new(RepoSyncStates::SubscriptionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::RepoId)
                            .big_integer()
                            .not_null(),
                    )
                    // Repository metadata
                    .col(ColumnDef::new(RepoSyncStates::RepoName).string().not_null())
                    .col(
                        ColumnDef::new(RepoSyncStates::RepoOwner)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::RepoFullName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RepoSyncStates::RepoUrl).text().not_null())
                    .col(
                        ColumnDef::new(RepoSyncStates::RepoUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Task progress
                    .col(ColumnDef::new(RepoSyncStates::PullCursor).text().null())
                    .col(ColumnDef::new(RepoSyncStates::PullStatus).string().null())
                    .col(ColumnDef::new(RepoSyncStates::CommitCursor).text().null())
                    .col(ColumnDef::new(RepoSyncStates::CommitStatus).string().null())
                    .col(ColumnDef::new(RepoSyncStates::BranchCursor).text().null())
                    .col(ColumnDef::new(RepoSyncStates::BranchStatus).string().null())
                    .col(ColumnDef::new(RepoSyncStates::BuildCursor).text().null())
                    .col(ColumnDef::new(RepoSyncStates::BuildStatus).string().null())
                    .col(
                        ColumnDef::new(RepoSyncStates::DeploymentCursor)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::DeploymentStatus)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(RepoSyncStates::FailedCode).string().null())
                    // Tracking
                    .col(
                        ColumnDef::new(RepoSyncStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepoSyncStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_repo_sync_states_subscription")
                            .from(RepoSyncStates::Table, RepoSyncStates::SubscriptionId)
                            .to(Subscriptions::Table, Subscriptions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Natural key used by the discovery bulk upsert.
        manager
            .create_index(
                Index::create()
                    .name("idx_repo_sync_states_subscription_repo")
                    .table(RepoSyncStates::Table)
                    .col(RepoSyncStates::SubscriptionId)
                    .col(RepoSyncStates::RepoId)
                    .unique()
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum ServerApps {
    Table,
    Id,
    AppId,
    Uuid,
    ClientId,
    BaseUrl,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    GithubInstallationId,
    JiraHost,
    GithubAppId,
    SyncStatus,
    SyncWarning,
    BackfillSinceDate,
    TotalNumberOfRepos,
    NumberOfSyncedRepos,
    RepositoryCursor,
    RepositoryStatus,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RepoSyncStates {
    Table,
    Id,
    SubscriptionId,
    RepoId,
    RepoName,
    RepoOwner,
    RepoFullName,
    RepoUrl,
    RepoUpdatedAt,
    PullCursor,
    PullStatus,
    CommitCursor,
    CommitStatus,
    BranchCursor,
    BranchStatus,
    BuildCursor,
    BuildStatus,
    DeploymentCursor,
    DeploymentStatus,
    FailedCode,
    CreatedAt,
    UpdatedAt,
}
