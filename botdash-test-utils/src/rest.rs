use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Result;
use botdash_core::VenueKind;
use hyper::body::to_bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::scenario::{ScenarioAction, ScenarioTrigger};
use crate::state::{MockServerConfig, MockServerState, RecordedRequest};

pub const API_PREFIX: &str = "/api/v1";

pub struct MockRestApi {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockRestApi {
    pub async fn spawn(state: MockServerState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let std_listener = listener.into_std()?;
        std_listener.set_nonblocking(true)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_svc = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(route(req, state).await) }
                }))
            }
        });
        let server = Server::from_tcp(std_listener)?.serve(make_svc);
        let handle = tokio::spawn(async move {
            if let Err(err) = server
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "mock REST server exited with error");
            }
        });
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    /// Base URL including the API prefix.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}{API_PREFIX}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockRestApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn route(req: Request<Body>, state: MockServerState) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let authorization = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = match to_bytes(body).await {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(err) => return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON: {err}")),
        },
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            )
        }
    };
    state
        .record_request(RecordedRequest {
            method: method.to_string(),
            path: path.clone(),
            authorization: authorization.clone(),
            body: body.clone(),
        })
        .await;

    let config = state.config().await;
    if let Some(token) = &config.required_token {
        if authorization.as_deref() != Some(format!("Bearer {token}").as_str()) {
            return error_response(StatusCode::UNAUTHORIZED, "invalid or expired token");
        }
    }

    let Some(rest) = path.strip_prefix(API_PREFIX) else {
        return not_found();
    };
    let segments: Vec<&str> = rest.split('/').filter(|segment| !segment.is_empty()).collect();

    match (method, segments.as_slice()) {
        (Method::GET, ["bots"]) => {
            guarded(&state, ScenarioTrigger::ListBots, || json!(config.bots)).await
        }
        (Method::GET, ["bots", bot, "state"]) => match config.states.get(*bot) {
            Some(value) => guarded(&state, ScenarioTrigger::BotState, || value.clone()).await,
            None => not_found(),
        },
        (Method::GET, ["bots", bot, "config"]) => match config.configs.get(*bot) {
            Some(value) => guarded(&state, ScenarioTrigger::BotConfig, || value.clone()).await,
            None => not_found(),
        },
        (Method::GET, ["bots", bot, "liquidities", venue]) => {
            match (known_bot(&config, bot), VenueKind::from_str(venue)) {
                (true, Ok(venue)) => {
                    guarded(&state, ScenarioTrigger::Liquidity, || {
                        json!({
                            "exchange": venue.as_path(),
                            "type": venue,
                            "liquidity": config.liquidity.get(&venue).cloned().unwrap_or_default(),
                        })
                    })
                    .await
                }
                _ => not_found(),
            }
        }
        (Method::GET, ["bots", bot, "prices", venue]) => {
            match (known_bot(&config, bot), VenueKind::from_str(venue)) {
                (true, Ok(venue)) => {
                    guarded(&state, ScenarioTrigger::Prices, || {
                        json!(config.prices.get(&venue).cloned().unwrap_or_default())
                    })
                    .await
                }
                _ => not_found(),
            }
        }
        (Method::GET, ["bots", bot, "prices"]) if known_bot(&config, bot) => {
            guarded(&state, ScenarioTrigger::AllPrices, || {
                json!({
                    "cex": config.prices.get(&VenueKind::Cex).cloned().unwrap_or_default(),
                    "dex": config.prices.get(&VenueKind::Dex).cloned().unwrap_or_default(),
                })
            })
            .await
        }
        (Method::GET, ["bots", bot, "currencyPairs"]) if known_bot(&config, bot) => {
            guarded(&state, ScenarioTrigger::CurrencyPairs, || {
                json!(config.currency_pairs)
            })
            .await
        }
        (Method::POST, ["bots", bot, "pause"]) if known_bot(&config, bot) => {
            if let Some(resp) = scripted(&state, ScenarioTrigger::Pause).await {
                return resp;
            }
            state.set_paused(bot, true).await;
            json_response(StatusCode::OK, json!({ "success": true }))
        }
        (Method::POST, ["bots", bot, "resume"]) if known_bot(&config, bot) => {
            if let Some(resp) = scripted(&state, ScenarioTrigger::Resume).await {
                return resp;
            }
            state.set_paused(bot, false).await;
            json_response(StatusCode::OK, json!({ "success": true }))
        }
        (Method::POST, ["bots", bot, "manualTrade"]) if known_bot(&config, bot) => {
            if let Some(resp) = scripted(&state, ScenarioTrigger::ManualTrade).await {
                return resp;
            }
            let Some(body) = body else {
                return error_response(StatusCode::BAD_REQUEST, "missing trade body");
            };
            state.record_trade(bot, body).await;
            json_response(
                StatusCode::OK,
                json!({ "status": "submitted", "id": Uuid::new_v4().to_string() }),
            )
        }
        _ => not_found(),
    }
}

fn known_bot(config: &MockServerConfig, bot: &str) -> bool {
    config.bots.iter().any(|known| known == bot)
}

/// Applies the next scripted behavior for `trigger`, returning a response when it short-circuits.
async fn scripted(state: &MockServerState, trigger: ScenarioTrigger) -> Option<Response<Body>> {
    match state.scenarios().take_for(trigger).await {
        Some(ScenarioAction::Delay(delay)) => {
            sleep(delay).await;
            None
        }
        Some(ScenarioAction::Fail { status, reason }) => Some(error_response(status, reason)),
        None => None,
    }
}

async fn guarded<F>(state: &MockServerState, trigger: ScenarioTrigger, body: F) -> Response<Body>
where
    F: FnOnce() -> Value,
{
    match scripted(state, trigger).await {
        Some(resp) => resp,
        None => json_response(StatusCode::OK, body()),
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    json_response(status, json!({ "error": message.into() }))
}

fn not_found() -> Response<Body> {
    error_response(StatusCode::NOT_FOUND, "not found")
}
