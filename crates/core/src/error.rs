//! Unified error types for callctx.
//!
//! Display strings carry a stable `CODE: detail` prefix so log lines and
//! HTTP error bodies can be matched on without parsing free text.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by every callctx crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., a caller number with no digits).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Cache store backend failed.
    #[error("CACHE_ERROR: {0}")]
    Cache(String),

    /// Cached or upstream payload could not be (de)serialized.
    #[error("SERIALIZE_ERROR: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("DB_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("DB_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Collaborator required for this operation is not configured.
    #[error("NOT_CONFIGURED: {0}")]
    NotConfigured(String),

    /// Upstream call exceeded its timeout.
    #[error("UPSTREAM_TIMEOUT: {0}")]
    UpstreamTimeout(String),

    /// Upstream answered with a non-success status.
    #[error("UPSTREAM_HTTP: {service} returned {status}")]
    UpstreamHttp { service: String, status: u16 },

    /// Upstream answered with a body we could not understand.
    #[error("UPSTREAM_PARSE: {0}")]
    UpstreamParse(String),

    /// Upstream could not be reached.
    #[error("UPSTREAM_ERROR: {0}")]
    Upstream(String),

    /// Background task panicked or was aborted.
    #[error("TASK_FAILED: {0}")]
    TaskFailed(String),
}

impl Error {
    /// HTTP status that best describes this error at the service boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::NotConfigured(_) => 503,
            Error::UpstreamTimeout(_) => 504,
            Error::UpstreamHttp { status, .. } if (400..500).contains(status) => *status,
            Error::UpstreamHttp { .. } | Error::UpstreamParse(_) | Error::Upstream(_) => 502,
            Error::Cache(_)
            | Error::Serialize(_)
            | Error::Database(_)
            | Error::MigrationFailed(_)
            | Error::TaskFailed(_) => 500,
        }
    }

    /// Whether the error came from an upstream collaborator.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamTimeout(_) | Error::UpstreamHttp { .. } | Error::UpstreamParse(_) | Error::Upstream(_)
        )
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
