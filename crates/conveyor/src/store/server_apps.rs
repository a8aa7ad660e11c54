//! Lookup of GitHub Enterprise server app registrations.

use sea_orm::{DatabaseConnection, EntityTrait};

use crate::entity::server_app;

use super::errors::{Result, StoreError};

/// Fetch a server app by its primary key, erroring when absent.
///
/// A subscription pointing at a missing server app cannot be synced at
/// all, so absence is an error here rather than an `Option`.
pub async fn get_by_id(db: &DatabaseConnection, github_app_id: i64) -> Result<server_app::Model> {
    server_app::Entity::find_by_id(github_app_id)
        .one(db)
        .await?
        .ok_or_else(|| StoreError::server_app_not_found(github_app_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use uuid::Uuid;

    #[tokio::test]
    async fn get_by_id_returns_row() {
        let model = server_app::Model {
            id: 3,
            app_id: 77,
            uuid: Uuid::new_v4(),
            client_id: "client".to_string(),
            base_url: "https://github.example.com".to_string(),
        };
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([vec![model.clone()]])
            .into_connection();

        let found = get_by_id(&db, 3).await.expect("lookup should succeed");
        assert_eq!(found, model);
    }

    #[tokio::test]
    async fn get_by_id_errors_when_missing() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([Vec::<server_app::Model>::new()])
            .into_connection();

        let err = get_by_id(&db, 3).await.expect_err("missing row should error");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
