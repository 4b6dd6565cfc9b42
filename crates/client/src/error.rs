//! Upstream client error types.

use std::sync::Arc;

/// Errors from the HTTP clients for the memory, CRM and prompt services.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Client constructed without the credentials it needs.
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    /// Base URL did not parse.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    /// Request exceeded the client timeout.
    #[error("{service} request timeout")]
    Timeout { service: &'static str },

    /// Non-success HTTP status.
    #[error("{service} HTTP error: {status}")]
    Http { service: &'static str, status: u16 },

    /// Connection or transport failure.
    #[error("{service} network error: {source}")]
    Network { service: &'static str, source: Arc<reqwest::Error> },

    /// Response body did not match the expected shape.
    #[error("{service} parse error: {message}")]
    Parse { service: &'static str, message: String },
}

impl UpstreamError {
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout { service }
        } else {
            UpstreamError::Network { service, source: Arc::new(err) }
        }
    }

    pub(crate) fn parse(service: &'static str, message: impl ToString) -> Self {
        UpstreamError::Parse { service, message: message.to_string() }
    }
}

impl From<UpstreamError> for callctx_core::Error {
    fn from(err: UpstreamError) -> Self {
        use callctx_core::Error;
        match err {
            UpstreamError::MissingCredentials(_) | UpstreamError::InvalidUrl(_) => Error::NotConfigured(err.to_string()),
            UpstreamError::Timeout { service } => Error::UpstreamTimeout(service.to_string()),
            UpstreamError::Http { service, status } => Error::UpstreamHttp { service: service.to_string(), status },
            UpstreamError::Network { .. } => Error::Upstream(err.to_string()),
            UpstreamError::Parse { .. } => Error::UpstreamParse(err.to_string()),
        }
    }
}
