use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur in the sync-state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Row not found.
    #[error("Not found: {context}")]
    NotFound { context: String },

    /// Invalid input data.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl StoreError {
    /// Create a NotFound error for a subscription lookup.
    pub fn subscription_not_found(subscription_id: i64) -> Self {
        Self::NotFound {
            context: format!("subscription id={subscription_id}"),
        }
    }

    /// Create a NotFound error for a server-app lookup.
    pub fn server_app_not_found(github_app_id: i64) -> Self {
        Self::NotFound {
            context: format!("server app id={github_app_id}"),
        }
    }
}

/// Check if a store error is transient and worth retrying.
pub(crate) fn is_retryable_error(err: &StoreError) -> bool {
    match err {
        StoreError::Database(db_err) => is_retryable_db_error(db_err),
        _ => false,
    }
}

fn is_retryable_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite: database is locked, busy
            // PostgreSQL: connection refused, too many connections
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_database_is_retryable() {
        let err = StoreError::Database(DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "database is locked".to_string(),
        )));
        assert!(is_retryable_error(&err));
    }

    #[test]
    fn not_found_is_not_retryable() {
        assert!(!is_retryable_error(&StoreError::subscription_not_found(1)));
    }
}
