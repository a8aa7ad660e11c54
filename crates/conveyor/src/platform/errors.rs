use chrono::{DateTime, Utc};
use thiserror::Error;

/// Response codes that indicate the destination or installation is gone
/// rather than an operational failure (site deleted, app uninstalled,
/// token revoked). Messages hitting these are discarded silently.
pub const UNRETRYABLE_STATUS_CODES: [u16; 3] = [401, 403, 404];

/// Errors from the source platform (the GitHub-style API the backfill
/// reads from).
///
/// Clients surface failures as one of these tagged variants so the
/// error-handler pipeline can match on them instead of probing ad hoc
/// `status` fields.
#[derive(Debug, Error)]
pub enum SourceError {
    /// API rejected the request with an HTTP status.
    #[error("Source API error: status {status}")]
    Api { status: u16, message: String },

    /// Primary or secondary rate limit exhausted.
    #[error("Source rate limit exceeded. Resets at {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Network or connection error.
    #[error("Source network error: {message}")]
    Network { message: String },

    /// Unexpected/internal error.
    #[error("Source internal error: {message}")]
    Internal { message: String },
}

impl SourceError {
    /// Create an API error.
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The HTTP status this error surfaced, if any.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this error is a rate limit error (retryable).
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Errors from the sink platform (the Jira-style API the synced data is
/// written to).
#[derive(Debug, Error)]
pub enum SinkError {
    /// API rejected the request with an HTTP status.
    #[error("Sink API error: status {status}")]
    Api { status: u16, message: String },

    /// Network or connection error.
    #[error("Sink network error: {message}")]
    Network { message: String },
}

impl SinkError {
    /// Create an API error.
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// The HTTP status this error surfaced, if any.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Network { .. } => None,
        }
    }
}

/// Result type for source platform operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type for sink platform operations.
pub type SinkResult<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_api_error_exposes_status() {
        let err = SourceError::api(404, "not found");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn rate_limited_has_no_status() {
        let err = SourceError::RateLimited {
            reset_at: Utc::now(),
        };
        assert_eq!(err.status(), None);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn sink_network_error_has_no_status() {
        let err = SinkError::Network {
            message: "connection reset".to_string(),
        };
        assert_eq!(err.status(), None);
    }
}
