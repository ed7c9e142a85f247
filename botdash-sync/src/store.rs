//! Root of the dashboard state: composes snapshot, live updates, logs and connectivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use botdash_config::SyncConfig;
use botdash_core::{
    BotId, CurrencyPair, ManualTradeArgs, VenueKind, DEFAULT_DEX_VENUE, DEFAULT_MAX_LOGS_PER_BOT,
    DEFAULT_PINNED_PAIR,
};
use botdash_transport::{BotApi, EventChannel};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::logs::LogAggregator;
use crate::model::{DashboardModel, LoadingFlags, SharedModel};
use crate::monitor::{ConnectionMonitor, DEFAULT_MONITOR_INTERVAL};
use crate::reducer::{LiveUpdateReducer, ReducerSettings};
use crate::snapshot::{SnapshotLoader, SnapshotOutcome};

/// Tunables for the synchronization engine.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub pinned_pair: CurrencyPair,
    pub dex_venue: String,
    pub max_logs_per_bot: usize,
    pub monitor_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            pinned_pair: DEFAULT_PINNED_PAIR.into(),
            dex_venue: DEFAULT_DEX_VENUE.into(),
            max_logs_per_bot: DEFAULT_MAX_LOGS_PER_BOT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            pinned_pair: config.pinned_pair.clone(),
            dex_venue: config.dex_venue.clone(),
            max_logs_per_bot: config.max_logs_per_bot,
            monitor_interval: config.monitor_interval(),
        }
    }
}

/// Session-scoped dashboard state backed by a [`BotApi`] and an [`EventChannel`].
pub struct DashboardStore {
    api: Arc<dyn BotApi>,
    channel: Arc<dyn EventChannel>,
    settings: SyncSettings,
    model: SharedModel,
    logs: Arc<LogAggregator>,
    loader: SnapshotLoader,
    monitor: ConnectionMonitor,
    reducer: LiveUpdateReducer,
    active: AtomicBool,
}

impl DashboardStore {
    pub fn new(
        api: Arc<dyn BotApi>,
        channel: Arc<dyn EventChannel>,
        settings: SyncSettings,
    ) -> Self {
        let model = SharedModel::new();
        let logs = Arc::new(LogAggregator::new(
            channel.clone(),
            settings.max_logs_per_bot,
        ));
        let loader = SnapshotLoader::new(
            api.clone(),
            model.clone(),
            logs.clone(),
            settings.pinned_pair.clone(),
        );
        let monitor = ConnectionMonitor::new(channel.clone(), settings.monitor_interval);
        let reducer = LiveUpdateReducer::new(
            channel.clone(),
            model.clone(),
            ReducerSettings {
                pinned_pair: settings.pinned_pair.clone(),
                dex_venue: settings.dex_venue.clone(),
            },
        );
        Self {
            api,
            channel,
            settings,
            model,
            logs,
            loader,
            monitor,
            reducer,
            active: AtomicBool::new(false),
        }
    }

    /// Load the snapshot, then start supervision and live updates.
    ///
    /// A roster failure is returned after activation so callers can report it; the
    /// store stays usable and live events still flow.
    pub async fn initialize(&self) -> SyncResult<SnapshotOutcome> {
        let outcome = self.loader.load_all().await;
        if let Err(err) = &outcome {
            error!(error = %err, "initial snapshot failed, continuing with live updates");
        }
        self.monitor.install_lifecycle_handlers();
        self.reducer.install();
        self.monitor.start();
        self.active.store(true, Ordering::SeqCst);
        info!(
            pinned_pair = %self.settings.pinned_pair,
            interval_secs = self.settings.monitor_interval.as_secs(),
            "dashboard store initialized"
        );
        outcome
    }

    /// Stop supervision and close the channel. Safe to call repeatedly.
    pub fn cleanup(&self) {
        self.monitor.stop();
        if self.active.swap(false, Ordering::SeqCst) {
            self.channel.disconnect();
            info!("dashboard store cleaned up");
        }
    }

    /// Fire-and-log; returns whether the server accepted the request.
    pub async fn pause_bot(&self, bot_id: &str) -> bool {
        match self.api.pause(bot_id).await {
            Ok(()) => {
                info!(bot = %bot_id, "bot paused");
                true
            }
            Err(err) => {
                error!(bot = %bot_id, error = %err, "failed to pause bot");
                false
            }
        }
    }

    pub async fn resume_bot(&self, bot_id: &str) -> bool {
        match self.api.resume(bot_id).await {
            Ok(()) => {
                info!(bot = %bot_id, "bot resumed");
                true
            }
            Err(err) => {
                error!(bot = %bot_id, error = %err, "failed to resume bot");
                false
            }
        }
    }

    pub async fn submit_manual_trade(
        &self,
        bot_id: &str,
        args: &ManualTradeArgs,
    ) -> SyncResult<Value> {
        match self.api.manual_trade(bot_id, args).await {
            Ok(result) => {
                info!(
                    bot = %bot_id,
                    side = ?args.side,
                    amount = args.amount,
                    venue = %args.exchange,
                    pair = %args.currency_pair,
                    "manual trade submitted"
                );
                Ok(result)
            }
            Err(source) => {
                warn!(bot = %bot_id, error = %source, "manual trade rejected");
                Err(SyncError::UserAction {
                    op: "manual trade",
                    source,
                })
            }
        }
    }

    pub async fn refresh_bots(&self) -> SyncResult<Vec<BotId>> {
        let bots = self.loader.refresh_bots().await?;
        self.logs.attach(&bots);
        Ok(bots)
    }

    pub async fn refresh_bot_state(&self, bot_id: &str) -> SyncResult<()> {
        self.loader.refresh_bot_state(bot_id).await
    }

    pub async fn refresh_bot_config(&self, bot_id: &str) -> SyncResult<()> {
        self.loader.refresh_bot_config(bot_id).await
    }

    pub async fn refresh_liquidity(&self, venue: VenueKind) -> SyncResult<()> {
        self.loader.refresh_liquidity(venue).await
    }

    pub async fn refresh_prices(&self, venue: VenueKind) -> SyncResult<()> {
        self.loader.refresh_prices(venue).await
    }

    pub async fn refresh_all_prices(&self) -> SyncResult<()> {
        self.loader.refresh_all_prices().await
    }

    pub async fn refresh_currency_pairs(&self) -> SyncResult<()> {
        self.loader.refresh_currency_pairs().await
    }

    #[must_use]
    pub fn snapshot(&self) -> DashboardModel {
        self.model.snapshot()
    }

    #[must_use]
    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Connectivity as tracked by the monitor.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    #[must_use]
    pub fn loading(&self) -> LoadingFlags {
        self.model.loading()
    }

    #[must_use]
    pub fn logs(&self) -> &LogAggregator {
        &self.logs
    }

    #[must_use]
    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn config(&self) -> &SyncSettings {
        &self.settings
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<dyn EventChannel> {
        &self.channel
    }
}

impl Drop for DashboardStore {
    fn drop(&mut self) {
        self.cleanup();
    }
}
