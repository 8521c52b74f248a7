//! Error types surfaced by the cache layer.

/// Failure reported by a [`Transport`](crate::transport::Transport).
///
/// The cache never recovers from or reclassifies these; they reach the caller
/// of the coordinator operation unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request never produced an HTTP response (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),
    /// Credentials were rejected and could not be refreshed.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The endpoint answered with a non-success status.
    #[error("server responded with {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
}

impl TransportError {
    /// HTTP status for server-reported failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return TransportError::Server {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        TransportError::Network(err.to_string())
    }
}

/// Error returned by [`CrudCoordinator`](crate::coordinator::CrudCoordinator) operations.
#[derive(Debug, thiserror::Error)]
pub enum CrudError {
    /// The transport call failed; the cache was left untouched.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A payload could not be converted to or from JSON; the cache was left untouched.
    #[error("invalid payload: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CrudError {
    /// The transport failure behind this error, if any.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            CrudError::Transport(err) => Some(err),
            CrudError::Serde(_) => None,
        }
    }
}

/// Convenience alias for coordinator results.
pub type CrudResult<T> = Result<T, CrudError>;
