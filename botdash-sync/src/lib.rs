//! Client-side state synchronization for the bot dashboard.
//!
//! A [`DashboardStore`] reconciles an HTTP snapshot with the live event stream:
//! the [`SnapshotLoader`] fills the model once, the [`LiveUpdateReducer`] and
//! [`LogAggregator`] apply incremental events afterwards, and the
//! [`ConnectionMonitor`] keeps the channel connected.

pub mod error;
pub mod logs;
pub mod model;
pub mod monitor;
pub mod reducer;
pub mod snapshot;
pub mod store;

pub use error::{SyncError, SyncResult};
pub use logs::LogAggregator;
pub use model::{DashboardModel, LoadingFlags, LoadingKind, SharedModel};
pub use monitor::ConnectionMonitor;
pub use reducer::{LiveUpdate, LiveUpdateReducer, ReducerSettings};
pub use snapshot::{SnapshotLoader, SnapshotOutcome};
pub use store::{DashboardStore, SyncSettings};
