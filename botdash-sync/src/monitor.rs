//! Connectivity supervision for the event channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use botdash_transport::{
    EventChannel, EventHandler, SubscriptionId, CONNECT_ERROR_TOPIC, CONNECT_TOPIC,
    DISCONNECT_TOPIC, RECONNECT_TOPIC,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

struct MonitorState {
    channel: Arc<dyn EventChannel>,
    assumed_connected: AtomicBool,
    ticks: AtomicU64,
    reconnect_requests: AtomicU64,
}

impl MonitorState {
    fn check(&self) -> bool {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        let live = self.channel.is_connected();
        let assumed = self.assumed_connected.load(Ordering::SeqCst);
        if live {
            if !assumed {
                info!("connection restored");
                self.assumed_connected.store(true, Ordering::SeqCst);
            }
        } else {
            if assumed {
                warn!("connection lost");
                self.assumed_connected.store(false, Ordering::SeqCst);
            }
            let attempt = self.reconnect_requests.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt, "requesting reconnect");
            self.channel.connect();
        }
        live
    }
}

/// Keeps an assumed-connected flag in line with the transport and asks it to reconnect.
pub struct ConnectionMonitor {
    state: Arc<MonitorState>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Mutex<Vec<SubscriptionId>>,
}

impl ConnectionMonitor {
    pub fn new(channel: Arc<dyn EventChannel>, interval: Duration) -> Self {
        Self {
            state: Arc::new(MonitorState {
                channel,
                assumed_connected: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                reconnect_requests: AtomicU64::new(0),
            }),
            interval,
            timer: Mutex::new(None),
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.assumed_connected.load(Ordering::SeqCst)
    }

    /// One supervision step. Returns the transport's live flag.
    pub fn check_connection(&self) -> bool {
        self.state.check()
    }

    /// Mirror the channel's lifecycle events into the flag. Repeated calls are no-ops.
    pub fn install_lifecycle_handlers(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_empty() {
            return;
        }
        let channel = self.state.channel.clone();

        let state = self.state.clone();
        let on_connect: EventHandler = Arc::new(move |_: &Value| {
            info!("event channel connected");
            state.assumed_connected.store(true, Ordering::SeqCst);
        });
        lifecycle.push(channel.subscribe(CONNECT_TOPIC, on_connect));

        let state = self.state.clone();
        let on_disconnect: EventHandler = Arc::new(move |reason: &Value| {
            warn!(reason = %reason, "event channel disconnected");
            state.assumed_connected.store(false, Ordering::SeqCst);
        });
        lifecycle.push(channel.subscribe(DISCONNECT_TOPIC, on_disconnect));

        let state = self.state.clone();
        let on_reconnect: EventHandler = Arc::new(move |attempts: &Value| {
            info!(attempts = %attempts, "event channel reconnected");
            state.assumed_connected.store(true, Ordering::SeqCst);
        });
        lifecycle.push(channel.subscribe(RECONNECT_TOPIC, on_reconnect));

        let state = self.state.clone();
        let on_error: EventHandler = Arc::new(move |error: &Value| {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            warn!(error = message, "event channel connection error");
            state.assumed_connected.store(false, Ordering::SeqCst);
        });
        lifecycle.push(channel.subscribe(CONNECT_ERROR_TOPIC, on_error));
    }

    /// Schedule periodic checks, replacing any timer already running.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        let state = self.state.clone();
        let period = self.interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                state.check();
            }
        }));
        debug!(interval_secs = period.as_secs_f64(), "connection monitor started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            debug!("connection monitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Checks performed so far, from the timer or direct calls.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.state.ticks.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reconnect_requests(&self) -> u64 {
        self.state.reconnect_requests.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
        let channel = &self.state.channel;
        for id in self.lifecycle.get_mut().drain(..) {
            channel.unsubscribe(id);
        }
    }
}
