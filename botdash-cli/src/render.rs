//! Plain-text rendering of dashboard state for the terminal.

use std::fmt::Write;

use botdash_core::{LogEntry, PriceMap};
use botdash_sync::{DashboardModel, LoadingFlags};
use serde_json::Value;

/// One log line, e.g. `12:00:01.250 [alpha] engine: order placed`.
#[must_use]
pub fn log_line(entry: &LogEntry) -> String {
    let mut line = String::new();
    if let Some(ts) = &entry.timestamp {
        let _ = write!(line, "{ts} ");
    }
    let _ = write!(line, "[{}]", entry.bot().unwrap_or("?"));
    if let Some(source) = entry.source.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(line, " {source}:");
    }
    let _ = write!(line, " {}", entry.message);
    if let Some(data) = entry.data.as_ref().filter(|data| !data.is_null()) {
        let _ = write!(line, " {data}");
    }
    line
}

/// The `status` field of an opaque bot state, when it carries one.
#[must_use]
pub fn bot_status(state: &Value) -> &str {
    state
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

fn price(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |price| format!("{price:.4}"))
}

fn prices(map: &PriceMap) -> String {
    let mut pairs: Vec<_> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(pair, value)| format!("{pair}={}", price(*value)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Multi-line summary printed by `watch` on every refresh.
#[must_use]
pub fn summary(
    model: &DashboardModel,
    pinned_pair: &str,
    connected: bool,
    loading: &LoadingFlags,
    log_count: impl Fn(&str) -> usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "connection: {}{}",
        if connected { "up" } else { "down" },
        if loading.any() { " (loading)" } else { "" }
    );
    let _ = writeln!(out, "{pinned_pair}: {}", price(model.cex_price));
    if !model.dex_prices.is_empty() {
        let _ = writeln!(out, "dex: {}", prices(&model.dex_prices));
    }
    for (label, entries) in [("cex", &model.cex_liquidity), ("dex", &model.dex_liquidity)] {
        if entries.is_empty() {
            continue;
        }
        let balances = entries
            .iter()
            .map(|entry| format!("{} {:.2}", entry.symbol, entry.amount))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "{label} liquidity: {balances}");
    }
    if model.bots.is_empty() {
        let _ = writeln!(out, "bots: none");
    }
    for bot in &model.bots {
        let status = model
            .bot_states
            .get(bot)
            .map(|state| bot_status(state.as_value()))
            .unwrap_or("unknown");
        let _ = writeln!(out, "  {bot}: {status} ({} log lines)", log_count(bot));
    }
    out
}
