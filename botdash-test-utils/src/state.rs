use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use botdash_core::{BotId, CurrencyPairs, Liquidity, PriceMap, VenueKind};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::scenario::ScenarioManager;

const REQUEST_HISTORY_LIMIT: usize = 1024;

/// Seed data and behavior knobs for [`crate::MockBotServer`].
#[derive(Clone, Debug)]
pub struct MockServerConfig {
    pub bots: Vec<BotId>,
    pub states: HashMap<BotId, Value>,
    pub configs: HashMap<BotId, Value>,
    pub liquidity: HashMap<VenueKind, Vec<Liquidity>>,
    pub prices: HashMap<VenueKind, PriceMap>,
    pub currency_pairs: CurrencyPairs,
    /// When set, REST calls must carry `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
    /// Reply to `request-auth-url`; no reply when unset.
    pub auth_url: Option<String>,
    pub namespace: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            bots: Vec::new(),
            states: HashMap::new(),
            configs: HashMap::new(),
            liquidity: HashMap::new(),
            prices: HashMap::new(),
            currency_pairs: CurrencyPairs::default(),
            required_token: None,
            auth_url: None,
            namespace: "/v1".into(),
            ping_interval: Duration::from_millis(500),
            ping_timeout: Duration::from_millis(500),
        }
    }
}

impl MockServerConfig {
    /// A roster whose bots report `{"status": "running"}` and an empty config.
    pub fn with_bots<I, S>(bots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BotId>,
    {
        let bots: Vec<BotId> = bots.into_iter().map(Into::into).collect();
        let states = bots
            .iter()
            .map(|bot| (bot.clone(), serde_json::json!({ "status": "running" })))
            .collect();
        let configs = bots
            .iter()
            .map(|bot| (bot.clone(), serde_json::json!({})))
            .collect();
        Self {
            bots,
            states,
            configs,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn price(mut self, venue: VenueKind, pair: &str, price: Option<f64>) -> Self {
        self.prices
            .entry(venue)
            .or_default()
            .insert(pair.to_string(), price);
        self
    }

    #[must_use]
    pub fn liquidity(mut self, venue: VenueKind, symbol: &str, amount: f64) -> Self {
        self.liquidity.entry(venue).or_default().push(Liquidity {
            amount,
            symbol: symbol.to_string(),
        });
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }
}

/// REST call observed by the mock server.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

/// Instruction for one connected socket.
#[derive(Clone, Debug)]
pub(crate) enum ServerPush {
    Frame(String),
    Close,
}

/// Shared state for the in-memory mock bot server.
#[derive(Clone)]
pub struct MockServerState {
    inner: Arc<Mutex<Inner>>,
    scenarios: ScenarioManager,
}

struct Inner {
    config: MockServerConfig,
    requests: VecDeque<RecordedRequest>,
    client_events: Vec<(String, Value)>,
    sockets: HashMap<u64, mpsc::UnboundedSender<ServerPush>>,
    next_socket: u64,
    namespace_joins: usize,
    paused: HashSet<BotId>,
    trades: Vec<(BotId, Value)>,
}

impl MockServerState {
    #[must_use]
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                requests: VecDeque::new(),
                client_events: Vec::new(),
                sockets: HashMap::new(),
                next_socket: 1,
                namespace_joins: 0,
                paused: HashSet::new(),
                trades: Vec::new(),
            })),
            scenarios: ScenarioManager::new(),
        }
    }

    #[must_use]
    pub fn scenarios(&self) -> ScenarioManager {
        self.scenarios.clone()
    }

    pub async fn config(&self) -> MockServerConfig {
        self.inner.lock().await.config.clone()
    }

    /// Mutate the seed data served from now on.
    pub async fn update_config<F>(&self, update: F)
    where
        F: FnOnce(&mut MockServerConfig),
    {
        let mut guard = self.inner.lock().await;
        update(&mut guard.config);
    }

    pub async fn record_request(&self, request: RecordedRequest) {
        let mut guard = self.inner.lock().await;
        if guard.requests.len() >= REQUEST_HISTORY_LIMIT {
            guard.requests.pop_front();
        }
        guard.requests.push_back(request);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().await.requests.iter().cloned().collect()
    }

    /// Number of recorded requests whose path ends with `suffix`.
    pub async fn request_count(&self, suffix: &str) -> usize {
        self.inner
            .lock()
            .await
            .requests
            .iter()
            .filter(|request| request.path.ends_with(suffix))
            .count()
    }

    pub(crate) async fn register_socket(&self, tx: mpsc::UnboundedSender<ServerPush>) -> u64 {
        let mut guard = self.inner.lock().await;
        let id = guard.next_socket;
        guard.next_socket += 1;
        guard.namespace_joins += 1;
        guard.sockets.insert(id, tx);
        id
    }

    pub(crate) async fn unregister_socket(&self, id: u64) {
        self.inner.lock().await.sockets.remove(&id);
    }

    /// Sockets currently joined to the namespace.
    pub async fn connected_sockets(&self) -> usize {
        self.inner.lock().await.sockets.len()
    }

    /// Total namespace joins since the server started.
    pub async fn namespace_joins(&self) -> usize {
        self.inner.lock().await.namespace_joins
    }

    pub(crate) async fn broadcast(&self, frame: String) -> usize {
        let guard = self.inner.lock().await;
        guard
            .sockets
            .values()
            .filter(|tx| tx.send(ServerPush::Frame(frame.clone())).is_ok())
            .count()
    }

    /// Close every live socket at the transport level.
    pub async fn drop_connections(&self) -> usize {
        let mut guard = self.inner.lock().await;
        guard
            .sockets
            .drain()
            .filter(|(_, tx)| tx.send(ServerPush::Close).is_ok())
            .count()
    }

    pub(crate) async fn record_client_event(&self, name: String, payload: Value) {
        self.inner.lock().await.client_events.push((name, payload));
    }

    /// Events emitted by clients, in arrival order.
    pub async fn client_events(&self) -> Vec<(String, Value)> {
        self.inner.lock().await.client_events.clone()
    }

    pub(crate) async fn set_paused(&self, bot_id: &str, paused: bool) {
        let mut guard = self.inner.lock().await;
        if paused {
            guard.paused.insert(bot_id.to_string());
        } else {
            guard.paused.remove(bot_id);
        }
    }

    pub async fn is_paused(&self, bot_id: &str) -> bool {
        self.inner.lock().await.paused.contains(bot_id)
    }

    pub(crate) async fn record_trade(&self, bot_id: &str, body: Value) {
        self.inner
            .lock()
            .await
            .trades
            .push((bot_id.to_string(), body));
    }

    pub async fn trades(&self) -> Vec<(BotId, Value)> {
        self.inner.lock().await.trades.clone()
    }
}
