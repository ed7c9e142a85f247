use botdash_transport::TransportError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures surfaced by the synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A snapshot or refresh request failed. Never fatal to the store.
    #[error("failed to fetch {op}: {source}")]
    Fetch {
        op: &'static str,
        #[source]
        source: TransportError,
    },
    /// A user-initiated command was rejected; callers are expected to report it.
    #[error("{op} failed: {source}")]
    UserAction {
        op: &'static str,
        #[source]
        source: TransportError,
    },
}

impl SyncError {
    pub(crate) fn fetch(op: &'static str, source: TransportError) -> Self {
        Self::Fetch { op, source }
    }
}
