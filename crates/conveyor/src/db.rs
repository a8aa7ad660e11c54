//! Database connection utilities.

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

/// SQLite pragmas applied on connect.
///
/// - `journal_mode=WAL` lets the listener loop read while the
///   orchestrator writes
/// - `busy_timeout=5000` waits for locks instead of failing immediately
/// - `synchronous=NORMAL` is safe under WAL and faster than FULL
const SQLITE_PRAGMAS: [&str; 3] = [
    "PRAGMA journal_mode=WAL",
    "PRAGMA busy_timeout=5000",
    "PRAGMA synchronous=NORMAL",
];

async fn configure_sqlite(db: &DatabaseConnection) -> Result<(), DbErr> {
    for pragma in SQLITE_PRAGMAS {
        db.execute(Statement::from_string(
            db.get_database_backend(),
            pragma.to_string(),
        ))
        .await?;
    }
    Ok(())
}

/// Establish a connection to the database.
///
/// SQLite connections get the WAL/busy-timeout/synchronous pragmas
/// applied automatically.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    if database_url.starts_with("sqlite://") {
        configure_sqlite(&db).await?;
    }

    Ok(db)
}

/// Establish a connection to the database and run all pending migrations.
///
/// This is the recommended way to initialize the database for services
/// embedding conveyor; it ensures the schema is always up to date.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established or migrations fail.
///
/// # Example
/// ```ignore
/// let db = conveyor::connect_and_migrate("postgres:///conveyor_dev").await?;
/// ```
#[cfg(feature = "migrate")]
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    use sea_orm_migration::MigratorTrait;

    let db = connect(database_url).await?;
    crate::migration::Migrator::up(&db, None).await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn configure_sqlite_runs_all_pragmas() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([
                MockExecResult {
                    rows_affected: 0,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 0,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 0,
                    last_insert_id: 0,
                },
            ])
            .into_connection();

        configure_sqlite(&db)
            .await
            .expect("mock sqlite pragma execs should succeed");
    }

    #[tokio::test]
    async fn connect_returns_error_for_invalid_database_url() {
        let err = connect("this-is-not-a-db-url")
            .await
            .expect_err("invalid URL should error");
        let msg = err.to_string().to_ascii_lowercase();
        assert!(
            msg.contains("error") || msg.contains("invalid"),
            "unexpected error message: {err}"
        );
    }
}
