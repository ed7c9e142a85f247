//! Applies live channel events to the dashboard model.

use std::sync::Arc;

use botdash_core::{
    pinned_price_topic, BotId, BotStateUpdate, CurrencyPair, Liquidity, LiquidityResponse,
    PriceUpdate, RawPayload, VenueKind,
};
use botdash_transport::{EventChannel, EventHandler, SubscriptionId};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::model::{DashboardModel, SharedModel};

pub const CEX_LIQUIDITY_TOPIC: &str = "cexLiquidityUpdate";
pub const DEX_LIQUIDITY_TOPIC: &str = "dexLiquidityUpdate";
pub const PRICE_UPDATE_TOPIC: &str = "price-update";
pub const BOT_STATE_TOPIC: &str = "botState";

/// Settings the reducer needs to route price events.
#[derive(Clone, Debug)]
pub struct ReducerSettings {
    pub pinned_pair: CurrencyPair,
    pub dex_venue: String,
}

/// A decoded live event, ready to be applied.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveUpdate {
    Liquidity {
        venue: VenueKind,
        entries: Vec<Liquidity>,
    },
    PinnedPrice(Option<f64>),
    DexPrice {
        pair: CurrencyPair,
        price: Option<f64>,
    },
    BotState {
        bot_id: BotId,
        state: Value,
    },
}

impl LiveUpdate {
    /// Decode `payload` received on `topic`. Malformed or filtered events yield `None`.
    pub fn decode(topic: &str, payload: &Value, settings: &ReducerSettings) -> Option<Self> {
        match topic {
            CEX_LIQUIDITY_TOPIC => decode_liquidity(payload)
                .map(|entries| Self::Liquidity {
                    venue: VenueKind::Cex,
                    entries,
                }),
            DEX_LIQUIDITY_TOPIC => decode_liquidity(payload)
                .map(|entries| Self::Liquidity {
                    venue: VenueKind::Dex,
                    entries,
                }),
            PRICE_UPDATE_TOPIC => {
                let update: PriceUpdate = parse(topic, payload)?;
                match (update.currency_pair, update.exchange) {
                    (Some(pair), Some(exchange))
                        if !pair.is_empty() && exchange == settings.dex_venue =>
                    {
                        Some(Self::DexPrice {
                            pair,
                            price: update.price,
                        })
                    }
                    _ => {
                        trace!("ignoring price update for another venue");
                        None
                    }
                }
            }
            BOT_STATE_TOPIC => {
                let update: BotStateUpdate = parse(topic, payload)?;
                match (update.bot_id, update.state) {
                    (Some(bot_id), Some(state)) if !bot_id.is_empty() && !state.is_null() => {
                        Some(Self::BotState { bot_id, state })
                    }
                    _ => {
                        debug!("ignoring bot state update without id or state");
                        None
                    }
                }
            }
            other if other == pinned_price_topic(&settings.pinned_pair) => {
                parse::<Option<f64>>(topic, payload).map(Self::PinnedPrice)
            }
            _ => None,
        }
    }

    pub fn apply(self, model: &mut DashboardModel, settings: &ReducerSettings) {
        match self {
            Self::Liquidity { venue, entries } => model.set_liquidity(venue, entries),
            Self::PinnedPrice(price) => model.set_pinned_price(&settings.pinned_pair, price),
            Self::DexPrice { pair, price } => {
                model.dex_prices.insert(pair, price);
            }
            Self::BotState { bot_id, state } => {
                model.bot_states.insert(bot_id, RawPayload::new(state));
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(topic: &str, payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(topic, error = %err, "dropping malformed event");
            None
        }
    }
}

/// Liquidity pushes carry a bare list; a full liquidity response is accepted too.
fn decode_liquidity(payload: &Value) -> Option<Vec<Liquidity>> {
    if payload.is_array() {
        return parse(CEX_LIQUIDITY_TOPIC, payload);
    }
    if payload.get("liquidity").is_none() {
        debug!("dropping liquidity push without entries");
        return None;
    }
    parse::<LiquidityResponse>(CEX_LIQUIDITY_TOPIC, payload).map(|response| response.liquidity)
}

/// Subscribes the fixed topic set and writes decoded events into the model.
pub struct LiveUpdateReducer {
    channel: Arc<dyn EventChannel>,
    model: SharedModel,
    settings: Arc<ReducerSettings>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl LiveUpdateReducer {
    pub fn new(channel: Arc<dyn EventChannel>, model: SharedModel, settings: ReducerSettings) -> Self {
        Self {
            channel,
            model,
            settings: Arc::new(settings),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        vec![
            CEX_LIQUIDITY_TOPIC.to_string(),
            DEX_LIQUIDITY_TOPIC.to_string(),
            pinned_price_topic(&self.settings.pinned_pair),
            PRICE_UPDATE_TOPIC.to_string(),
            BOT_STATE_TOPIC.to_string(),
        ]
    }

    /// Subscribe every topic once. Returns `false` when already installed.
    pub fn install(&self) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return false;
        }
        for topic in self.topics() {
            let model = self.model.clone();
            let settings = self.settings.clone();
            let name = topic.clone();
            let handler: EventHandler = Arc::new(move |payload: &Value| {
                if let Some(update) = LiveUpdate::decode(&name, payload, &settings) {
                    trace!(topic = %name, "applying live update");
                    model.update(|state| update.apply(state, &settings));
                }
            });
            subscriptions.push(self.channel.subscribe(&topic, handler));
        }
        debug!(topics = subscriptions.len(), "live update reducer installed");
        true
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    pub fn uninstall(&self) {
        for id in self.subscriptions.lock().drain(..) {
            self.channel.unsubscribe(id);
        }
    }
}

impl Drop for LiveUpdateReducer {
    fn drop(&mut self) {
        self.uninstall();
    }
}
