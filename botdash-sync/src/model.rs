//! In-memory dashboard model and the loading flags that accompany it.

use std::collections::HashMap;
use std::sync::Arc;

use botdash_core::{
    BotConfig, BotId, BotState, CurrencyPairs, Liquidity, PriceMap, VenueKind,
};
use parking_lot::RwLock;

/// Everything the dashboard knows about the bots it mirrors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DashboardModel {
    pub bots: Vec<BotId>,
    pub bot_states: HashMap<BotId, BotState>,
    pub bot_configs: HashMap<BotId, BotConfig>,
    pub cex_liquidity: Vec<Liquidity>,
    pub dex_liquidity: Vec<Liquidity>,
    pub cex_prices: PriceMap,
    pub dex_prices: PriceMap,
    /// Scalar mirror of `cex_prices[pinned pair]`.
    pub cex_price: Option<f64>,
    pub currency_pairs: CurrencyPairs,
}

impl DashboardModel {
    #[must_use]
    pub fn liquidity(&self, venue: VenueKind) -> &[Liquidity] {
        match venue {
            VenueKind::Cex => &self.cex_liquidity,
            VenueKind::Dex => &self.dex_liquidity,
        }
    }

    pub fn set_liquidity(&mut self, venue: VenueKind, entries: Vec<Liquidity>) {
        match venue {
            VenueKind::Cex => self.cex_liquidity = entries,
            VenueKind::Dex => self.dex_liquidity = entries,
        }
    }

    /// Update the pinned pair's scalar and its map entry together.
    pub fn set_pinned_price(&mut self, pair: &str, price: Option<f64>) {
        self.cex_price = price;
        self.cex_prices.insert(pair.to_string(), price);
    }

    /// Replace the centralized map; the scalar follows only when the pair is quoted.
    pub fn replace_cex_prices(&mut self, prices: PriceMap, pinned_pair: &str) {
        if let Some(price) = prices.get(pinned_pair) {
            self.cex_price = *price;
        }
        self.cex_prices = prices;
    }

    #[must_use]
    pub fn prices(&self, venue: VenueKind) -> &PriceMap {
        match venue {
            VenueKind::Cex => &self.cex_prices,
            VenueKind::Dex => &self.dex_prices,
        }
    }
}

/// Operation kinds tracked by [`LoadingFlags`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LoadingKind {
    Bots,
    BotState,
    BotConfig,
    CexLiquidity,
    DexLiquidity,
    CexPrices,
    DexPrices,
    AllPrices,
    CurrencyPairs,
}

impl LoadingKind {
    #[must_use]
    pub fn liquidity(venue: VenueKind) -> Self {
        match venue {
            VenueKind::Cex => Self::CexLiquidity,
            VenueKind::Dex => Self::DexLiquidity,
        }
    }

    #[must_use]
    pub fn prices(venue: VenueKind) -> Self {
        match venue {
            VenueKind::Cex => Self::CexPrices,
            VenueKind::Dex => Self::DexPrices,
        }
    }
}

/// One flag per in-flight operation kind. Parallel fetches of the same kind share a flag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadingFlags {
    pub bots: bool,
    pub bot_state: bool,
    pub bot_config: bool,
    pub cex_liquidity: bool,
    pub dex_liquidity: bool,
    pub cex_prices: bool,
    pub dex_prices: bool,
    pub all_prices: bool,
    pub currency_pairs: bool,
}

impl LoadingFlags {
    fn slot(&mut self, kind: LoadingKind) -> &mut bool {
        match kind {
            LoadingKind::Bots => &mut self.bots,
            LoadingKind::BotState => &mut self.bot_state,
            LoadingKind::BotConfig => &mut self.bot_config,
            LoadingKind::CexLiquidity => &mut self.cex_liquidity,
            LoadingKind::DexLiquidity => &mut self.dex_liquidity,
            LoadingKind::CexPrices => &mut self.cex_prices,
            LoadingKind::DexPrices => &mut self.dex_prices,
            LoadingKind::AllPrices => &mut self.all_prices,
            LoadingKind::CurrencyPairs => &mut self.currency_pairs,
        }
    }

    #[must_use]
    pub fn get(&self, kind: LoadingKind) -> bool {
        match kind {
            LoadingKind::Bots => self.bots,
            LoadingKind::BotState => self.bot_state,
            LoadingKind::BotConfig => self.bot_config,
            LoadingKind::CexLiquidity => self.cex_liquidity,
            LoadingKind::DexLiquidity => self.dex_liquidity,
            LoadingKind::CexPrices => self.cex_prices,
            LoadingKind::DexPrices => self.dex_prices,
            LoadingKind::AllPrices => self.all_prices,
            LoadingKind::CurrencyPairs => self.currency_pairs,
        }
    }

    pub fn set(&mut self, kind: LoadingKind, value: bool) {
        *self.slot(kind) = value;
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.bots
            || self.bot_state
            || self.bot_config
            || self.cex_liquidity
            || self.dex_liquidity
            || self.cex_prices
            || self.dex_prices
            || self.all_prices
            || self.currency_pairs
    }
}

/// Shared handle to the model. Locks are held only for short synchronous sections.
#[derive(Clone, Default)]
pub struct SharedModel {
    model: Arc<RwLock<DashboardModel>>,
    loading: Arc<RwLock<LoadingFlags>>,
}

impl SharedModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&DashboardModel) -> R) -> R {
        f(&self.model.read())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut DashboardModel) -> R) -> R {
        f(&mut self.model.write())
    }

    #[must_use]
    pub fn snapshot(&self) -> DashboardModel {
        self.model.read().clone()
    }

    #[must_use]
    pub fn loading(&self) -> LoadingFlags {
        *self.loading.read()
    }

    /// Raise `kind`'s flag until the returned guard is dropped.
    #[must_use = "the flag is cleared as soon as the guard drops"]
    pub fn begin(&self, kind: LoadingKind) -> LoadingGuard {
        self.loading.write().set(kind, true);
        LoadingGuard {
            flags: self.loading.clone(),
            kind,
        }
    }
}

/// Clears its loading flag on drop, whether the fetch succeeded or not.
pub struct LoadingGuard {
    flags: Arc<RwLock<LoadingFlags>>,
    kind: LoadingKind,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.flags.write().set(self.kind, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_resets_flag_on_drop() {
        let shared = SharedModel::new();
        {
            let _guard = shared.begin(LoadingKind::DexPrices);
            assert!(shared.loading().dex_prices);
            assert!(shared.loading().any());
        }
        assert!(!shared.loading().dex_prices);
        assert!(!shared.loading().any());
    }

    #[test]
    fn flags_read_back_only_their_own_kind() {
        let kinds = [
            LoadingKind::Bots,
            LoadingKind::BotState,
            LoadingKind::BotConfig,
            LoadingKind::CexLiquidity,
            LoadingKind::DexLiquidity,
            LoadingKind::CexPrices,
            LoadingKind::DexPrices,
            LoadingKind::AllPrices,
            LoadingKind::CurrencyPairs,
        ];
        for kind in kinds {
            let mut flags = LoadingFlags::default();
            flags.set(kind, true);
            for other in kinds {
                assert_eq!(flags.get(other), other == kind, "{kind:?} vs {other:?}");
            }
            assert!(flags.any());
        }
    }

    #[test]
    fn pinned_price_updates_scalar_and_map() {
        let mut model = DashboardModel::default();
        model.set_pinned_price("SEI-USDT", Some(1.02));
        assert_eq!(model.cex_price, Some(1.02));
        assert_eq!(model.cex_prices.get("SEI-USDT"), Some(&Some(1.02)));
    }

    #[test]
    fn replacing_cex_prices_keeps_scalar_when_pair_missing() {
        let mut model = DashboardModel::default();
        model.set_pinned_price("SEI-USDT", Some(1.0));
        let prices: PriceMap = [("BTC-USDT".to_string(), Some(60_000.0))].into();
        model.replace_cex_prices(prices, "SEI-USDT");
        assert_eq!(model.cex_price, Some(1.0));
        assert!(!model.cex_prices.contains_key("SEI-USDT"));

        let prices: PriceMap = [("SEI-USDT".to_string(), Some(0.9))].into();
        model.replace_cex_prices(prices, "SEI-USDT");
        assert_eq!(model.cex_price, Some(0.9));
    }
}
