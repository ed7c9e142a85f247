//! Initial HTTP snapshot and the individual re-fetch operations.

use std::sync::Arc;

use botdash_core::{BotId, CurrencyPair, VenueKind};
use botdash_transport::{BotApi, TransportError};
use futures::future::{join_all, BoxFuture};
use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::logs::LogAggregator;
use crate::model::{LoadingKind, SharedModel};

/// Result of a full snapshot load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The roster was empty; nothing else was requested.
    Empty,
    Loaded {
        bots: Vec<BotId>,
        /// Per-bot or venue fetches that failed and left their slice untouched.
        failures: usize,
    },
}

pub struct SnapshotLoader {
    api: Arc<dyn BotApi>,
    model: SharedModel,
    logs: Arc<LogAggregator>,
    pinned_pair: CurrencyPair,
}

impl SnapshotLoader {
    pub fn new(
        api: Arc<dyn BotApi>,
        model: SharedModel,
        logs: Arc<LogAggregator>,
        pinned_pair: impl Into<CurrencyPair>,
    ) -> Self {
        Self {
            api,
            model,
            logs,
            pinned_pair: pinned_pair.into(),
        }
    }

    /// Fetch the roster, attach log streams, then load every slice in parallel.
    pub async fn load_all(&self) -> SyncResult<SnapshotOutcome> {
        let bots = self.refresh_bots().await?;
        self.logs.attach(&bots);
        let Some(primary) = bots.first() else {
            warn!("no bots found, skipping snapshot");
            return Ok(SnapshotOutcome::Empty);
        };

        let mut fetches: Vec<BoxFuture<'_, SyncResult<()>>> = Vec::new();
        for bot_id in &bots {
            fetches.push(Box::pin(self.refresh_bot_state(bot_id)));
            fetches.push(Box::pin(self.refresh_bot_config(bot_id)));
        }
        for venue in VenueKind::ALL {
            fetches.push(Box::pin(self.refresh_liquidity_for(primary, venue)));
            fetches.push(Box::pin(self.refresh_prices_for(primary, venue)));
        }
        fetches.push(Box::pin(self.refresh_currency_pairs_for(primary)));

        let failures = join_all(fetches)
            .await
            .into_iter()
            .filter(Result::is_err)
            .count();
        if failures > 0 {
            warn!(bots = bots.len(), failures, "snapshot loaded with failures");
        } else {
            info!(bots = bots.len(), primary = %primary, "snapshot loaded");
        }
        Ok(SnapshotOutcome::Loaded { bots, failures })
    }

    pub async fn refresh_bots(&self) -> SyncResult<Vec<BotId>> {
        let _loading = self.model.begin(LoadingKind::Bots);
        let bots = self
            .api
            .list_bots()
            .await
            .map_err(|err| failed("bots", None, err))?;
        self.model.update(|model| model.bots = bots.clone());
        Ok(bots)
    }

    pub async fn refresh_bot_state(&self, bot_id: &str) -> SyncResult<()> {
        let _loading = self.model.begin(LoadingKind::BotState);
        let state = self
            .api
            .bot_state(bot_id)
            .await
            .map_err(|err| failed("bot state", Some(bot_id), err))?;
        self.model.update(|model| {
            model.bot_states.insert(bot_id.to_string(), state);
        });
        Ok(())
    }

    pub async fn refresh_bot_config(&self, bot_id: &str) -> SyncResult<()> {
        let _loading = self.model.begin(LoadingKind::BotConfig);
        let config = self
            .api
            .bot_config(bot_id)
            .await
            .map_err(|err| failed("bot config", Some(bot_id), err))?;
        self.model.update(|model| {
            model.bot_configs.insert(bot_id.to_string(), config);
        });
        Ok(())
    }

    /// Liquidity of the primary bot on one venue.
    pub async fn refresh_liquidity(&self, venue: VenueKind) -> SyncResult<()> {
        match self.primary_bot() {
            Some(bot_id) => self.refresh_liquidity_for(&bot_id, venue).await,
            None => Ok(()),
        }
    }

    pub async fn refresh_liquidity_for(&self, bot_id: &str, venue: VenueKind) -> SyncResult<()> {
        let _loading = self.model.begin(LoadingKind::liquidity(venue));
        let response = self
            .api
            .liquidity(bot_id, venue)
            .await
            .map_err(|err| failed(liquidity_op(venue), Some(bot_id), err))?;
        self.model
            .update(|model| model.set_liquidity(venue, response.liquidity));
        Ok(())
    }

    pub async fn refresh_prices(&self, venue: VenueKind) -> SyncResult<()> {
        match self.primary_bot() {
            Some(bot_id) => self.refresh_prices_for(&bot_id, venue).await,
            None => Ok(()),
        }
    }

    pub async fn refresh_prices_for(&self, bot_id: &str, venue: VenueKind) -> SyncResult<()> {
        let _loading = self.model.begin(LoadingKind::prices(venue));
        let prices = self
            .api
            .prices(bot_id, venue)
            .await
            .map_err(|err| failed(prices_op(venue), Some(bot_id), err))?;
        let pinned = self.pinned_pair.as_str();
        self.model.update(|model| match venue {
            VenueKind::Cex => model.replace_cex_prices(prices, pinned),
            VenueKind::Dex => model.dex_prices = prices,
        });
        Ok(())
    }

    /// Combined endpoint: replaces the centralized map and merges into the decentralized one.
    pub async fn refresh_all_prices(&self) -> SyncResult<()> {
        let Some(bot_id) = self.primary_bot() else {
            return Ok(());
        };
        let _loading = self.model.begin(LoadingKind::AllPrices);
        let prices = self
            .api
            .all_prices(&bot_id)
            .await
            .map_err(|err| failed("all prices", Some(&bot_id), err))?;
        let pinned = self.pinned_pair.as_str();
        self.model.update(|model| {
            model.replace_cex_prices(prices.cex, pinned);
            model.dex_prices.extend(prices.dex);
        });
        Ok(())
    }

    pub async fn refresh_currency_pairs(&self) -> SyncResult<()> {
        match self.primary_bot() {
            Some(bot_id) => self.refresh_currency_pairs_for(&bot_id).await,
            None => Ok(()),
        }
    }

    pub async fn refresh_currency_pairs_for(&self, bot_id: &str) -> SyncResult<()> {
        let _loading = self.model.begin(LoadingKind::CurrencyPairs);
        let pairs = self
            .api
            .currency_pairs(bot_id)
            .await
            .map_err(|err| failed("currency pairs", Some(bot_id), err))?;
        self.model.update(|model| model.currency_pairs = pairs);
        Ok(())
    }

    fn primary_bot(&self) -> Option<BotId> {
        let primary = self.model.read(|model| model.bots.first().cloned());
        if primary.is_none() {
            warn!("no bots known, skipping refresh");
        }
        primary
    }
}

fn liquidity_op(venue: VenueKind) -> &'static str {
    match venue {
        VenueKind::Cex => "cex liquidity",
        VenueKind::Dex => "dex liquidity",
    }
}

fn prices_op(venue: VenueKind) -> &'static str {
    match venue {
        VenueKind::Cex => "cex prices",
        VenueKind::Dex => "dex prices",
    }
}

fn failed(op: &'static str, bot_id: Option<&str>, err: TransportError) -> SyncError {
    match bot_id {
        Some(bot_id) => error!(bot = %bot_id, error = %err, "failed to fetch {op}"),
        None => error!(error = %err, "failed to fetch {op}"),
    }
    SyncError::fetch(op, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use botdash_core::{AllPrices, Liquidity, PriceMap};
    use botdash_test_utils::{ApiCall, InMemoryChannel, StubApi};
    use serde_json::json;

    fn loader(api: Arc<StubApi>) -> (SharedModel, Arc<LogAggregator>, SnapshotLoader) {
        let model = SharedModel::new();
        let logs = Arc::new(LogAggregator::new(InMemoryChannel::new(), 500));
        let loader = SnapshotLoader::new(api, model.clone(), logs.clone(), "SEI-USDT");
        (model, logs, loader)
    }

    fn prices(entries: &[(&str, Option<f64>)]) -> PriceMap {
        entries
            .iter()
            .map(|(pair, price)| (pair.to_string(), *price))
            .collect()
    }

    #[tokio::test]
    async fn empty_roster_issues_no_per_bot_fetches() {
        let api = StubApi::new();
        let (model, _, loader) = loader(api.clone());
        assert_eq!(loader.load_all().await.unwrap(), SnapshotOutcome::Empty);
        assert_eq!(api.calls().len(), 1);
        assert_eq!(api.call_count(ApiCall::ListBots), 1);
        assert!(!model.loading().any());
    }

    #[tokio::test]
    async fn roster_failure_is_reported_and_flag_reset() {
        let api = StubApi::with_bots(["bot1"]);
        api.fail(ApiCall::ListBots);
        let (model, logs, loader) = loader(api.clone());
        let err = loader.load_all().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { op: "bots", .. }));
        assert!(!model.loading().bots);
        assert_eq!(api.calls().len(), 1);
        assert!(logs.attached().is_empty());
    }

    #[tokio::test]
    async fn loads_every_slice_and_attaches_logs() {
        let api = StubApi::with_bots(["bot1", "bot2"]);
        api.set_state("bot2", json!({ "status": "paused" }));
        api.set_liquidity(VenueKind::Cex, vec![Liquidity { amount: 10.0, symbol: "USDT".into() }]);
        api.set_prices(VenueKind::Cex, prices(&[("SEI-USDT", Some(1.00))]));
        api.set_prices(VenueKind::Dex, prices(&[("SEI-USDC", Some(0.98))]));
        let (model, logs, loader) = loader(api.clone());

        let outcome = loader.load_all().await.unwrap();
        assert_eq!(
            outcome,
            SnapshotOutcome::Loaded {
                bots: vec!["bot1".into(), "bot2".into()],
                failures: 0
            }
        );
        let snapshot = model.snapshot();
        assert_eq!(snapshot.bot_states.len(), 2);
        assert_eq!(snapshot.bot_configs.len(), 2);
        assert_eq!(snapshot.bot_states["bot2"].as_value()["status"], "paused");
        assert_eq!(snapshot.cex_liquidity.len(), 1);
        assert_eq!(snapshot.cex_price, Some(1.00));
        assert_eq!(snapshot.dex_prices["SEI-USDC"], Some(0.98));
        assert_eq!(logs.attached(), vec!["bot1".to_string(), "bot2".to_string()]);

        // Venue data comes from the first bot only.
        let venue_calls: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|(call, _)| matches!(call, ApiCall::Liquidity(_) | ApiCall::Prices(_)))
            .collect();
        assert_eq!(venue_calls.len(), 4);
        assert!(venue_calls.iter().all(|(_, bot)| bot.as_deref() == Some("bot1")));
        assert!(!model.loading().any());
    }

    #[tokio::test]
    async fn failing_liquidity_does_not_block_siblings() {
        let api = StubApi::with_bots(["bot1", "bot2"]);
        api.fail(ApiCall::Liquidity(VenueKind::Cex));
        api.fail(ApiCall::Liquidity(VenueKind::Dex));
        let (model, _, loader) = loader(api);
        match loader.load_all().await.unwrap() {
            SnapshotOutcome::Loaded { failures, .. } => assert_eq!(failures, 2),
            other => panic!("unexpected outcome {other:?}"),
        }
        let snapshot = model.snapshot();
        assert_eq!(snapshot.bot_states.len(), 2);
        assert_eq!(snapshot.bot_configs.len(), 2);
        assert!(snapshot.cex_liquidity.is_empty());
        assert!(!model.loading().cex_liquidity);
        assert!(!model.loading().dex_liquidity);
    }

    #[tokio::test]
    async fn all_prices_replace_cex_and_merge_dex() {
        let api = StubApi::with_bots(["bot1"]);
        let (model, _, loader) = loader(api.clone());
        loader.refresh_bots().await.unwrap();
        model.update(|state| {
            state.cex_prices = prices(&[("BTC-USDT", Some(1.0))]);
            state.dex_prices = prices(&[("ATOM-USDC", Some(7.0))]);
        });
        api.set_all_prices(AllPrices {
            cex: prices(&[("SEI-USDT", Some(1.05))]),
            dex: prices(&[("SEI-USDC", None)]),
        });
        loader.refresh_all_prices().await.unwrap();
        let snapshot = model.snapshot();
        assert_eq!(snapshot.cex_prices.len(), 1);
        assert_eq!(snapshot.cex_price, Some(1.05));
        assert_eq!(snapshot.dex_prices.len(), 2);
        assert_eq!(snapshot.dex_prices["SEI-USDC"], None);
    }

    #[tokio::test]
    async fn venue_refresh_without_roster_is_skipped() {
        let api = StubApi::with_bots(["bot1"]);
        let (_, _, loader) = loader(api.clone());
        loader.refresh_prices(VenueKind::Dex).await.unwrap();
        loader.refresh_currency_pairs().await.unwrap();
        assert!(api.calls().is_empty());
    }
}
