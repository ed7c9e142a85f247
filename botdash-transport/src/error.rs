use thiserror::Error;

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// Common error type returned by the REST and socket transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Represents transport-level failures (network, timeouts, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// The server rejected the session credential; the session has been logged out.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    /// Wraps serialization or parsing errors.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Returned when the request parameters are invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The channel has been shut down.
    #[error("channel closed")]
    Closed,
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl TransportError {
    /// Helper used when mapping any error type into a transport error.
    pub fn from_display(err: impl std::fmt::Display, kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Transport => Self::Transport(err.to_string()),
            TransportErrorKind::Unauthorized => Self::Unauthorized(err.to_string()),
            TransportErrorKind::Serialization => Self::Serialization(err.to_string()),
            TransportErrorKind::InvalidRequest => Self::InvalidRequest(err.to_string()),
            TransportErrorKind::Other => Self::Other(err.to_string()),
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Enumerates the broad families of transport errors.
#[derive(Debug, Clone, Copy)]
pub enum TransportErrorKind {
    Transport,
    Unauthorized,
    Serialization,
    InvalidRequest,
    Other,
}
