use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use botdash_core::{
    AllPrices, BotConfig, BotId, BotState, CurrencyPairs, Liquidity, LiquidityResponse,
    ManualTradeArgs, PriceMap, RawPayload, VenueKind,
};
use botdash_transport::{BotApi, TransportError, TransportResult};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Identifies one [`BotApi`] operation for scripting and call assertions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ApiCall {
    ListBots,
    BotState,
    BotConfig,
    Liquidity(VenueKind),
    Prices(VenueKind),
    AllPrices,
    CurrencyPairs,
    Pause,
    Resume,
    ManualTrade,
}

#[derive(Default)]
struct StubData {
    bots: Vec<BotId>,
    states: HashMap<BotId, Value>,
    configs: HashMap<BotId, Value>,
    liquidity: HashMap<VenueKind, Vec<Liquidity>>,
    prices: HashMap<VenueKind, PriceMap>,
    all_prices: AllPrices,
    pairs: CurrencyPairs,
}

/// Scriptable in-process [`BotApi`] that records every call.
#[derive(Default)]
pub struct StubApi {
    data: Mutex<StubData>,
    failing: Mutex<HashSet<ApiCall>>,
    delays: Mutex<HashMap<ApiCall, Duration>>,
    calls: Mutex<Vec<(ApiCall, Option<BotId>)>>,
    trades: Mutex<Vec<(BotId, ManualTradeArgs)>>,
}

impl StubApi {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Roster whose bots report `{"status": "running"}`.
    pub fn with_bots<I, S>(bots: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<BotId>,
    {
        let api = Self::default();
        {
            let mut data = api.data.lock();
            for bot in bots {
                let bot = bot.into();
                data.states
                    .insert(bot.clone(), json!({ "status": "running" }));
                data.configs.insert(bot.clone(), json!({}));
                data.bots.push(bot);
            }
        }
        Arc::new(api)
    }

    pub fn set_state(&self, bot_id: &str, state: Value) {
        self.data.lock().states.insert(bot_id.to_string(), state);
    }

    pub fn set_config(&self, bot_id: &str, config: Value) {
        self.data.lock().configs.insert(bot_id.to_string(), config);
    }

    pub fn set_liquidity(&self, venue: VenueKind, liquidity: Vec<Liquidity>) {
        self.data.lock().liquidity.insert(venue, liquidity);
    }

    pub fn set_prices(&self, venue: VenueKind, prices: PriceMap) {
        self.data.lock().prices.insert(venue, prices);
    }

    pub fn set_all_prices(&self, prices: AllPrices) {
        self.data.lock().all_prices = prices;
    }

    pub fn set_currency_pairs(&self, pairs: CurrencyPairs) {
        self.data.lock().pairs = pairs;
    }

    /// Make `call` fail with a 500 until [`StubApi::recover`] is called.
    pub fn fail(&self, call: ApiCall) {
        self.failing.lock().insert(call);
    }

    pub fn recover(&self, call: ApiCall) {
        self.failing.lock().remove(&call);
    }

    pub fn delay(&self, call: ApiCall, delay: Duration) {
        self.delays.lock().insert(call, delay);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<(ApiCall, Option<BotId>)> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self, call: ApiCall) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(recorded, _)| *recorded == call)
            .count()
    }

    #[must_use]
    pub fn trades(&self) -> Vec<(BotId, ManualTradeArgs)> {
        self.trades.lock().clone()
    }

    async fn enter(&self, call: ApiCall, bot_id: Option<&str>) -> TransportResult<()> {
        self.calls
            .lock()
            .push((call, bot_id.map(str::to_string)));
        let delay = self.delays.lock().get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(&call) {
            return Err(TransportError::Status {
                status: 500,
                body: format!("stubbed failure for {call:?}"),
            });
        }
        Ok(())
    }
}

fn missing(bot_id: &str) -> TransportError {
    TransportError::Status {
        status: 404,
        body: format!("unknown bot {bot_id}"),
    }
}

#[async_trait]
impl BotApi for StubApi {
    async fn list_bots(&self) -> TransportResult<Vec<BotId>> {
        self.enter(ApiCall::ListBots, None).await?;
        Ok(self.data.lock().bots.clone())
    }

    async fn bot_state(&self, bot_id: &str) -> TransportResult<BotState> {
        self.enter(ApiCall::BotState, Some(bot_id)).await?;
        self.data
            .lock()
            .states
            .get(bot_id)
            .cloned()
            .map(RawPayload::new)
            .ok_or_else(|| missing(bot_id))
    }

    async fn bot_config(&self, bot_id: &str) -> TransportResult<BotConfig> {
        self.enter(ApiCall::BotConfig, Some(bot_id)).await?;
        self.data
            .lock()
            .configs
            .get(bot_id)
            .cloned()
            .map(RawPayload::new)
            .ok_or_else(|| missing(bot_id))
    }

    async fn liquidity(
        &self,
        bot_id: &str,
        venue: VenueKind,
    ) -> TransportResult<LiquidityResponse> {
        self.enter(ApiCall::Liquidity(venue), Some(bot_id)).await?;
        Ok(LiquidityResponse {
            exchange: venue.as_path().to_string(),
            kind: Some(venue),
            liquidity: self
                .data
                .lock()
                .liquidity
                .get(&venue)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn prices(&self, bot_id: &str, venue: VenueKind) -> TransportResult<PriceMap> {
        self.enter(ApiCall::Prices(venue), Some(bot_id)).await?;
        Ok(self
            .data
            .lock()
            .prices
            .get(&venue)
            .cloned()
            .unwrap_or_default())
    }

    async fn all_prices(&self, bot_id: &str) -> TransportResult<AllPrices> {
        self.enter(ApiCall::AllPrices, Some(bot_id)).await?;
        Ok(self.data.lock().all_prices.clone())
    }

    async fn currency_pairs(&self, bot_id: &str) -> TransportResult<CurrencyPairs> {
        self.enter(ApiCall::CurrencyPairs, Some(bot_id)).await?;
        Ok(self.data.lock().pairs.clone())
    }

    async fn pause(&self, bot_id: &str) -> TransportResult<()> {
        self.enter(ApiCall::Pause, Some(bot_id)).await
    }

    async fn resume(&self, bot_id: &str) -> TransportResult<()> {
        self.enter(ApiCall::Resume, Some(bot_id)).await
    }

    async fn manual_trade(&self, bot_id: &str, args: &ManualTradeArgs) -> TransportResult<Value> {
        self.enter(ApiCall::ManualTrade, Some(bot_id)).await?;
        self.trades.lock().push((bot_id.to_string(), args.clone()));
        Ok(json!({ "status": "submitted" }))
    }
}
