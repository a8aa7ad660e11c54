//! ServerApp entity - GitHub Enterprise app registrations.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A GitHub App registered on a GitHub Enterprise server.
///
/// Cloud installations have no row here; their app configuration comes
/// from process settings instead.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server_apps")]
pub struct Model {
    /// Internal primary key (referenced by `subscriptions.github_app_id`).
    #[sea_orm(primary_key)]
    pub id: i64,

    /// App id assigned by the GitHub server.
    pub app_id: i64,
    /// Install-link UUID for this app.
    #[sea_orm(unique)]
    pub uuid: Uuid,
    /// OAuth client id.
    pub client_id: String,
    /// Base URL of the GitHub server (e.g. `https://github.example.com`).
    #[sea_orm(column_type = "Text")]
    pub base_url: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
