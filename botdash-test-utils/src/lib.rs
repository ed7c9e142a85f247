//! Utilities for standing up a mock bot server and in-process transport doubles.

use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::{sleep, Instant};

pub mod api;
pub mod channel;
pub mod rest;
pub mod scenario;
pub mod server;
pub mod state;
pub mod websocket;

pub use api::{ApiCall, StubApi};
pub use channel::InMemoryChannel;
pub use scenario::{Scenario, ScenarioAction, ScenarioManager, ScenarioTrigger};
pub use server::MockBotServer;
pub use state::{MockServerConfig, MockServerState, RecordedRequest};

/// Polls `check` every 20ms until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("condition not met within {limit:?}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}
