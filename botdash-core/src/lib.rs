//! Fundamental data types shared across the entire workspace.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier assigned to a remote bot.
pub type BotId = String;
/// Alias used for human-readable currency pairs (e.g., `SEI-USDT`).
pub type CurrencyPair = String;

/// Last known quote per currency pair. `None` means the venue reported no price.
pub type PriceMap = HashMap<CurrencyPair, Option<f64>>;

/// Default pair that receives a dedicated scalar mirror next to the price map.
pub const DEFAULT_PINNED_PAIR: &str = "SEI-USDT";
/// Venue tag carried by decentralized `price-update` events.
pub const DEFAULT_DEX_VENUE: &str = "seichain";
/// Default capacity of each per-bot log buffer.
pub const DEFAULT_MAX_LOGS_PER_BOT: usize = 500;

/// Trading venue category.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    Cex,
    Dex,
}

impl VenueKind {
    pub const ALL: [VenueKind; 2] = [VenueKind::Cex, VenueKind::Dex];

    /// Path segment used by the REST API.
    #[must_use]
    pub fn as_path(self) -> &'static str {
        match self {
            Self::Cex => "cex",
            Self::Dex => "dex",
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

impl FromStr for VenueKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "cex" => Ok(Self::Cex),
            "dex" => Ok(Self::Dex),
            other => Err(format!("unsupported venue kind '{other}'")),
        }
    }
}

/// Order direction for manual trades.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("unsupported side '{other}'")),
        }
    }
}

/// Free-form structured payload owned by the bot (state or configuration).
///
/// The dashboard never interprets its fields; it is stored and rendered as-is.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawPayload(pub Value);

impl RawPayload {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RawPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Operational state reported by a bot.
pub type BotState = RawPayload;
/// Configuration reported by a bot.
pub type BotConfig = RawPayload;

/// Balance held on a single venue.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Liquidity {
    pub amount: f64,
    pub symbol: String,
}

/// Response body of the liquidity endpoints.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LiquidityResponse {
    #[serde(default)]
    pub exchange: String,
    #[serde(rename = "type")]
    pub kind: Option<VenueKind>,
    #[serde(default)]
    pub liquidity: Vec<Liquidity>,
}

/// Combined price response of `GET /bots/{id}/prices`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AllPrices {
    #[serde(default)]
    pub cex: PriceMap,
    #[serde(default)]
    pub dex: PriceMap,
}

/// Currency pairs a bot trades on each venue.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CurrencyPairs {
    #[serde(default)]
    pub cex: Vec<CurrencyPair>,
    #[serde(default)]
    pub dex: Vec<CurrencyPair>,
}

/// Payload of the `price-update` topic.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub currency_pair: Option<CurrencyPair>,
    pub exchange: Option<String>,
    pub price: Option<f64>,
}

/// Payload of the `botState` topic.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStateUpdate {
    pub bot_id: Option<BotId>,
    pub state: Option<Value>,
}

/// Timestamp attached to a log entry; bots emit either epoch millis or RFC 3339 text.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogTimestamp {
    Millis(i64),
    Text(String),
}

impl LogTimestamp {
    /// Interpret the timestamp as UTC when possible.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

impl fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(ts) => write!(f, "{}", ts.format("%H:%M:%S%.3f")),
            None => match self {
                Self::Millis(ms) => write!(f, "{ms}"),
                Self::Text(text) => f.write_str(text),
            },
        }
    }
}

/// Single line of bot log output delivered over `log/{botId}`.
///
/// Decoding never fails: only the bot id is load-bearing, every other field is
/// read leniently and left empty when its shape is unexpected.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct LogEntry {
    pub timestamp: Option<LogTimestamp>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub source: Option<String>,
    pub session_id: Option<String>,
    pub bot_id: Option<BotId>,
}

/// Scalars rendered as text; objects, arrays and null yield `None`.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn lenient_timestamp(value: Option<&Value>) -> Option<LogTimestamp> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|ms| ms.is_finite()).map(|ms| ms.round() as i64))
            .map(LogTimestamp::Millis),
        Value::String(text) => Some(LogTimestamp::Text(text.clone())),
        _ => None,
    }
}

impl From<Value> for LogEntry {
    fn from(payload: Value) -> Self {
        let bot_id = ["botId", "botid"]
            .into_iter()
            .find_map(|key| {
                payload
                    .get(key)
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
            })
            .map(str::to_string);
        let message = match payload.get("message") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        Self {
            timestamp: lenient_timestamp(payload.get("timestamp")),
            message,
            data: payload.get("data").filter(|data| !data.is_null()).cloned(),
            color: scalar_text(payload.get("color")),
            kind: scalar_text(payload.get("type")),
            source: scalar_text(payload.get("source")),
            session_id: scalar_text(payload.get("sessionId")),
            bot_id,
        }
    }
}

impl LogEntry {
    /// Minimal entry used by tests and synthetic feeds.
    pub fn new(bot_id: impl Into<BotId>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(LogTimestamp::Millis(Utc::now().timestamp_millis())),
            message: message.into(),
            data: None,
            color: None,
            kind: None,
            source: None,
            session_id: None,
            bot_id: Some(bot_id.into()),
        }
    }

    /// Bot id when present and non-empty.
    #[must_use]
    pub fn bot(&self) -> Option<&str> {
        self.bot_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Request body of `POST /bots/{id}/manualTrade`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTradeArgs {
    pub side: Side,
    pub amount: f64,
    pub exchange: VenueKind,
    pub currency_pair: CurrencyPair,
}

/// Subscription topic carrying one bot's log stream.
#[must_use]
pub fn log_topic(bot_id: &str) -> String {
    format!("log/{bot_id}")
}

/// Subscription topic carrying the scalar price of the pinned pair.
#[must_use]
pub fn pinned_price_topic(pair: &str) -> String {
    format!("cex-{pair}-price")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_entry_accepts_legacy_bot_id_spelling() {
        let entry: LogEntry = serde_json::from_value(json!({
            "timestamp": 1_700_000_000_000i64,
            "message": "filled",
            "source": "engine",
            "sessionId": "s-1",
            "botid": "bot1"
        }))
        .expect("log entry");
        assert_eq!(entry.bot(), Some("bot1"));
        assert_eq!(entry.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn log_entry_tolerates_unexpected_field_shapes() {
        let entry: LogEntry = serde_json::from_value(json!({
            "timestamp": 1_700_000_000_123.5,
            "message": { "k": 1 },
            "source": 3,
            "sessionId": ["s"],
            "botId": "bot1",
            "botid": "ignored"
        }))
        .expect("log entry");
        assert_eq!(entry.bot(), Some("bot1"));
        assert_eq!(entry.timestamp, Some(LogTimestamp::Millis(1_700_000_000_124)));
        assert_eq!(entry.message, "{\"k\":1}");
        assert_eq!(entry.source.as_deref(), Some("3"));
        assert_eq!(entry.session_id, None);

        let orphan = LogEntry::from(json!("plain text"));
        assert_eq!(orphan.bot(), None);
        assert!(orphan.message.is_empty());
    }

    #[test]
    fn empty_bot_id_is_treated_as_missing() {
        let mut entry = LogEntry::new("", "noise");
        assert_eq!(entry.bot(), None);
        entry.bot_id = None;
        assert_eq!(entry.bot(), None);
    }

    #[test]
    fn price_map_keeps_unknown_quotes() {
        let prices: AllPrices = serde_json::from_value(json!({
            "cex": {"SEI-USDT": 0.41, "BTC-USDT": null}
        }))
        .expect("prices");
        assert_eq!(prices.cex.get("SEI-USDT"), Some(&Some(0.41)));
        assert_eq!(prices.cex.get("BTC-USDT"), Some(&None));
        assert!(prices.dex.is_empty());
    }

    #[test]
    fn manual_trade_serializes_wire_names() {
        let args = ManualTradeArgs {
            side: Side::Sell,
            amount: 12.5,
            exchange: VenueKind::Dex,
            currency_pair: "SEI-USDT".into(),
        };
        let value = serde_json::to_value(&args).expect("serialize");
        assert_eq!(
            value,
            json!({"side": "sell", "amount": 12.5, "exchange": "dex", "currencyPair": "SEI-USDT"})
        );
    }

    #[test]
    fn topics_follow_server_naming() {
        assert_eq!(log_topic("bot1"), "log/bot1");
        assert_eq!(pinned_price_topic("SEI-USDT"), "cex-SEI-USDT-price");
    }
}
