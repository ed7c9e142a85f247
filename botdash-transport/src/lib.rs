//! Transport layer between the dashboard and a remote bot server.
//!
//! Two halves share one [`Session`]: the request/reply [`BotApi`] served over
//! HTTP and the persistent [`EventChannel`] served over Socket.IO.

use std::sync::Arc;

use async_trait::async_trait;
use botdash_core::{
    AllPrices, BotConfig, BotId, BotState, CurrencyPairs, LiquidityResponse, ManualTradeArgs,
    PriceMap, VenueKind,
};
use serde_json::Value;

pub mod error;
pub mod http;
pub mod session;
pub mod socket;
pub mod wire;

pub use error::{TransportError, TransportErrorKind, TransportResult};
pub use http::{HttpApiConfig, HttpBotApi};
pub use session::{request_auth_url, Session};
pub use socket::{SocketChannel, SocketConfig};

/// Lifecycle topics dispatched by the channel itself.
pub const CONNECT_TOPIC: &str = "connect";
pub const DISCONNECT_TOPIC: &str = "disconnect";
pub const RECONNECT_TOPIC: &str = "reconnect";
pub const CONNECT_ERROR_TOPIC: &str = "connect_error";

/// Callback invoked with the first argument of every event delivered on a topic.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`EventChannel::subscribe`], used to remove one listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Request/reply surface of the bot server (`/api/v1`).
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Roster of bots known to the server.
    async fn list_bots(&self) -> TransportResult<Vec<BotId>>;

    async fn bot_state(&self, bot_id: &str) -> TransportResult<BotState>;

    async fn bot_config(&self, bot_id: &str) -> TransportResult<BotConfig>;

    async fn liquidity(&self, bot_id: &str, venue: VenueKind)
        -> TransportResult<LiquidityResponse>;

    async fn prices(&self, bot_id: &str, venue: VenueKind) -> TransportResult<PriceMap>;

    /// Both venues' prices in one call.
    async fn all_prices(&self, bot_id: &str) -> TransportResult<AllPrices>;

    async fn currency_pairs(&self, bot_id: &str) -> TransportResult<CurrencyPairs>;

    async fn pause(&self, bot_id: &str) -> TransportResult<()>;

    async fn resume(&self, bot_id: &str) -> TransportResult<()>;

    /// Submit a user-initiated trade; the result body is opaque.
    async fn manual_trade(&self, bot_id: &str, args: &ManualTradeArgs) -> TransportResult<Value>;
}

/// Persistent topic-based event channel with transport-level reconnect.
///
/// Handlers for a topic run in registration order and observe events in the
/// order the transport delivered them.
pub trait EventChannel: Send + Sync {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove one listener. Returns `false` when the id is unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Remove every listener of a topic, returning how many were removed.
    fn unsubscribe_topic(&self, topic: &str) -> usize;

    fn listener_count(&self, topic: &str) -> usize;

    /// Live connected flag as reported by the transport.
    fn is_connected(&self) -> bool;

    /// Request a (re)connection. Safe to call while one is already underway.
    fn connect(&self);

    /// Close the connection and suspend automatic reconnects until [`EventChannel::connect`].
    fn disconnect(&self);

    /// Send an event to the server.
    fn emit(&self, topic: &str, payload: Value) -> TransportResult<()>;
}
