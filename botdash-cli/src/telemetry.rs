use std::convert::Infallible;
use std::fs::{self, OpenOptions};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use botdash_core::VenueKind;
use botdash_sync::DashboardStore;
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Request, Response, StatusCode};
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::shutdown::ShutdownSignal;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber with optional JSON file logging.
pub fn init_tracing(filter: &str, log_path: Option<&Path>) -> Result<()> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));
    if let Some(path) = log_path {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {dir:?}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let _ = FILE_GUARD.set(guard);
        let file_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .with_filter(EnvFilter::new(filter));
        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(stdout_layer)
            .try_init()?;
    }

    Ok(())
}

/// Prometheus view of a running dashboard session.
pub struct DashboardMetrics {
    registry: Registry,
    connection_status: Gauge,
    reconnect_requests: IntGauge,
    bots: IntGauge,
    buffered_logs: GaugeVec,
    log_lines_total: IntCounter,
    price: GaugeVec,
}

impl DashboardMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let connection_status = Gauge::new(
            "botdash_connection_status",
            "Assumed event channel status (1=connected, 0=disconnected)",
        )?;
        let reconnect_requests = IntGauge::new(
            "botdash_reconnect_requests",
            "Reconnects requested by the connection monitor",
        )?;
        let bots = IntGauge::new("botdash_bots", "Bots in the current roster")?;
        let buffered_logs = GaugeVec::new(
            Opts::new("botdash_buffered_log_lines", "Log lines held per bot"),
            &["bot"],
        )?;
        let log_lines_total =
            IntCounter::new("botdash_log_lines_total", "Log lines received from bots")?;
        let price = GaugeVec::new(
            Opts::new("botdash_price", "Latest known price per currency pair"),
            &["venue", "pair"],
        )?;

        registry.register(Box::new(connection_status.clone()))?;
        registry.register(Box::new(reconnect_requests.clone()))?;
        registry.register(Box::new(bots.clone()))?;
        registry.register(Box::new(buffered_logs.clone()))?;
        registry.register(Box::new(log_lines_total.clone()))?;
        registry.register(Box::new(price.clone()))?;

        Ok(Self {
            registry,
            connection_status,
            reconnect_requests,
            bots,
            buffered_logs,
            log_lines_total,
            price,
        })
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub fn inc_log_line(&self) {
        self.log_lines_total.inc();
    }

    /// Copy the store's current state into the gauges.
    pub fn observe(&self, store: &DashboardStore) {
        self.connection_status
            .set(if store.is_connected() { 1.0 } else { 0.0 });
        self.reconnect_requests
            .set(store.monitor().reconnect_requests() as i64);
        let model = store.snapshot();
        self.bots.set(model.bots.len() as i64);
        for bot in &model.bots {
            self.buffered_logs
                .with_label_values(&[bot.as_str()])
                .set(store.logs().len(bot) as f64);
        }
        for (venue, prices) in [
            (VenueKind::Cex, &model.cex_prices),
            (VenueKind::Dex, &model.dex_prices),
        ] {
            for (pair, value) in prices {
                if let Some(value) = value {
                    self.price
                        .with_label_values(&[venue.as_path(), pair.as_str()])
                        .set(*value);
                }
            }
        }
    }
}

/// Periodically sample the store and count incoming log lines until shutdown.
pub fn spawn_metrics_sampler(
    store: Arc<DashboardStore>,
    metrics: Arc<DashboardMetrics>,
    period: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    let mut feed = store.logs().subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => metrics.observe(&store),
                line = feed.recv() => match line {
                    Ok(_) => metrics.inc_log_line(),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "metrics sampler lagged behind the log feed");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.wait() => break,
            }
        }
    })
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Launch a lightweight HTTP server that exposes Prometheus metrics.
pub fn spawn_metrics_server(registry: Registry, addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let make_svc = make_service_fn(move |_| {
            let registry = registry.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                    let registry = registry.clone();
                    async move {
                        let encoder = TextEncoder::new();
                        let metric_families = registry.gather();
                        let mut buffer = Vec::new();
                        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
                            error!(error = %err, "failed to encode Prometheus metrics");
                            return Ok::<_, Infallible>(respond(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "text/plain",
                                "failed to encode metrics",
                            ));
                        }
                        Ok::<_, Infallible>(respond(
                            StatusCode::OK,
                            encoder.format_type(),
                            buffer,
                        ))
                    }
                }))
            }
        });

        match hyper::Server::try_bind(&addr) {
            Ok(server) => {
                info!(%addr, "metrics server listening");
                if let Err(err) = server.serve(make_svc).await {
                    error!(error = %err, %addr, "metrics server terminated");
                }
            }
            Err(err) => error!(error = %err, %addr, "failed to bind metrics server"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use botdash_sync::SyncSettings;
    use botdash_test_utils::{InMemoryChannel, StubApi};
    use serde_json::json;

    #[tokio::test]
    async fn observe_reflects_store_state() -> Result<()> {
        let api = StubApi::with_bots(["alpha"]);
        let mut prices = botdash_core::PriceMap::new();
        prices.insert("SEI-USDT".into(), Some(1.25));
        prices.insert("ATOM-USDT".into(), None);
        api.set_prices(VenueKind::Cex, prices);
        let channel = InMemoryChannel::new();
        let store = DashboardStore::new(api, channel.clone(), SyncSettings::default());
        store.initialize().await?;
        channel.deliver(
            "log/alpha",
            json!({ "message": "tick", "botId": "alpha" }),
        );

        let metrics = DashboardMetrics::new()?;
        metrics.observe(&store);
        let families = metrics.registry().gather();
        let value = |name: &str| {
            families
                .iter()
                .find(|family| family.get_name() == name)
                .map(|family| family.get_metric().len())
        };
        assert_eq!(metrics.bots.get(), 1);
        assert_eq!(metrics.connection_status.get(), 0.0);
        assert_eq!(
            metrics.buffered_logs.with_label_values(&["alpha"]).get(),
            1.0
        );
        assert_eq!(
            metrics
                .price
                .with_label_values(&["cex", "SEI-USDT"])
                .get(),
            1.25
        );
        assert_eq!(value("botdash_price"), Some(1));
        store.cleanup();
        Ok(())
    }
}
