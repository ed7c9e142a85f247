use std::sync::Arc;
use std::time::Duration;

use hyper::StatusCode;
use tokio::sync::Mutex;

/// Server interaction a scripted behavior can attach to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScenarioTrigger {
    ListBots,
    BotState,
    BotConfig,
    Liquidity,
    Prices,
    AllPrices,
    CurrencyPairs,
    Pause,
    Resume,
    ManualTrade,
    /// A client asking to join the socket namespace.
    NamespaceConnect,
}

/// Scripted behavior that alters the next matching interaction.
#[derive(Clone, Debug)]
pub enum ScenarioAction {
    Delay(Duration),
    Fail { status: StatusCode, reason: String },
}

#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub trigger: ScenarioTrigger,
    pub action: ScenarioAction,
}

impl Scenario {
    pub fn fail(
        name: impl Into<String>,
        trigger: ScenarioTrigger,
        status: StatusCode,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            action: ScenarioAction::Fail {
                status,
                reason: reason.into(),
            },
        }
    }

    pub fn delay(name: impl Into<String>, trigger: ScenarioTrigger, delay: Duration) -> Self {
        Self {
            name: name.into(),
            trigger,
            action: ScenarioAction::Delay(delay),
        }
    }
}

/// Thread-safe queue of scripted scenarios. Each scenario fires once.
#[derive(Clone, Default)]
pub struct ScenarioManager {
    inner: Arc<Mutex<Vec<Scenario>>>,
}

impl ScenarioManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, scenario: Scenario) {
        self.inner.lock().await.push(scenario);
    }

    /// Drains and returns the first scenario matching the trigger.
    pub async fn take_for(&self, trigger: ScenarioTrigger) -> Option<ScenarioAction> {
        let mut guard = self.inner.lock().await;
        guard
            .iter()
            .position(|scenario| scenario.trigger == trigger)
            .map(|idx| guard.remove(idx).action)
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}
