//! Botdash aggregate crate that re-exports the main components for downstream users.

pub use botdash_config as config;
pub use botdash_core as core;
pub use botdash_sync as sync;
pub use botdash_transport as transport;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use botdash_config::{load_config, AppConfig, SyncConfig, TransportConfig};
    pub use botdash_core::*;
    pub use botdash_sync::{
        ConnectionMonitor, DashboardModel, DashboardStore, LiveUpdate, LiveUpdateReducer,
        LoadingFlags, LoadingKind, LogAggregator, SharedModel, SnapshotLoader, SnapshotOutcome,
        SyncError, SyncResult, SyncSettings,
    };
    pub use botdash_transport::{
        request_auth_url, BotApi, EventChannel, EventHandler, HttpApiConfig, HttpBotApi, Session,
        SocketChannel, SocketConfig, SubscriptionId, TransportError, TransportResult,
    };
}
