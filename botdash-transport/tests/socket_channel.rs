use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use botdash_test_utils::{wait_until, MockBotServer, MockServerConfig, Scenario, ScenarioTrigger};
use botdash_transport::{
    request_auth_url, EventChannel, EventHandler, SocketChannel, SocketConfig,
    CONNECT_ERROR_TOPIC, CONNECT_TOPIC, DISCONNECT_TOPIC, RECONNECT_TOPIC,
};
use hyper::StatusCode;
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

fn open_channel(server: &MockBotServer, namespace: &str) -> SocketChannel {
    SocketChannel::open(SocketConfig {
        server_url: server.socket_url(),
        namespace: namespace.into(),
        connect_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(50),
        reconnect_delay_max: Duration::from_millis(200),
    })
}

fn recorder(channel: &SocketChannel, topic: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: EventHandler = Arc::new(move |payload: &Value| {
        sink.lock().unwrap().push(payload.clone());
    });
    channel.subscribe(topic, handler);
    seen
}

fn len(values: &Arc<Mutex<Vec<Value>>>) -> usize {
    values.lock().unwrap().len()
}

#[tokio::test(flavor = "multi_thread")]
async fn delivers_server_events_in_order() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    let channel = open_channel(&server, "/v1");
    let connects = recorder(&channel, CONNECT_TOPIC);
    let updates = recorder(&channel, "botState");

    wait_until(WAIT, || channel.is_connected()).await?;
    assert_eq!(len(&connects), 1);

    for n in 0..5 {
        server
            .emit("botState", json!({ "botId": "bot1", "state": { "seq": n } }))
            .await;
    }
    wait_until(WAIT, || len(&updates) == 5).await?;
    let seqs: Vec<i64> = updates
        .lock()
        .unwrap()
        .iter()
        .filter_map(|value| value["state"]["seq"].as_i64())
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_transport_loss() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    let channel = open_channel(&server, "/v1");
    let disconnects = recorder(&channel, DISCONNECT_TOPIC);
    let reconnects = recorder(&channel, RECONNECT_TOPIC);
    wait_until(WAIT, || channel.is_connected()).await?;

    assert_eq!(server.drop_connections().await, 1);
    wait_until(WAIT, || len(&disconnects) == 1).await?;
    wait_until(WAIT, || len(&reconnects) == 1).await?;
    assert!(channel.is_connected());
    let attempts = reconnects.lock().unwrap()[0].as_u64().unwrap_or_default();
    assert!(attempts >= 1);
    assert_eq!(server.state().namespace_joins().await, 2);

    // Events flow again on the new session.
    let prices = recorder(&channel, "cex-SEI-USDT-price");
    server.emit("cex-SEI-USDT-price", json!(0.51)).await;
    wait_until(WAIT, || len(&prices) == 1).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_disconnect_suspends_reconnects() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    let channel = open_channel(&server, "/v1");
    wait_until(WAIT, || channel.is_connected()).await?;

    channel.disconnect();
    assert!(!channel.is_connected());
    let state = server.state();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!channel.is_connected());
    assert_eq!(state.namespace_joins().await, 1);

    channel.connect();
    wait_until(WAIT, || channel.is_connected()).await?;
    assert_eq!(state.namespace_joins().await, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_namespace_reports_connect_error() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::default()).await?;
    let channel = open_channel(&server, "/v9");
    let errors = recorder(&channel, CONNECT_ERROR_TOPIC);
    wait_until(WAIT, || len(&errors) >= 1).await?;
    assert!(!channel.is_connected());
    let message = errors.lock().unwrap()[0]["message"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(message.contains("Invalid namespace"), "{message}");
    channel.disconnect();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_join_is_retried_until_accepted() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    let scenarios = server.state().scenarios();
    scenarios
        .push(Scenario::fail(
            "refuse first join",
            ScenarioTrigger::NamespaceConnect,
            StatusCode::FORBIDDEN,
            "join refused",
        ))
        .await;
    scenarios
        .push(Scenario::delay(
            "slow second join",
            ScenarioTrigger::NamespaceConnect,
            Duration::from_millis(300),
        ))
        .await;

    let channel = open_channel(&server, "/v1");
    let errors = recorder(&channel, CONNECT_ERROR_TOPIC);
    let connects = recorder(&channel, CONNECT_TOPIC);
    let reconnects = recorder(&channel, RECONNECT_TOPIC);

    wait_until(WAIT, || len(&errors) == 1).await?;
    assert!(!channel.is_connected());
    let message = errors.lock().unwrap()[0]["message"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(message.contains("join refused"), "{message}");

    wait_until(WAIT, || channel.is_connected()).await?;
    assert_eq!(len(&errors), 1);
    assert_eq!(len(&connects), 1);
    assert_eq!(reconnects.lock().unwrap().clone(), vec![json!(1)]);
    assert_eq!(server.state().namespace_joins().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_url_round_trip() -> Result<()> {
    let mut config = MockServerConfig::default();
    config.auth_url = Some("https://login.example/authorize".into());
    let server = MockBotServer::start(config).await?;
    let channel = open_channel(&server, "/v1");
    wait_until(WAIT, || channel.is_connected()).await?;

    let url = request_auth_url(&channel, "google", Duration::from_secs(3)).await?;
    assert_eq!(url, "https://login.example/authorize?provider=google");
    assert_eq!(channel.listener_count("auth-url"), 0);

    let events = server.state().client_events().await;
    assert_eq!(events[0].0, "request-auth-url");
    assert_eq!(events[0].1["provider"], "google");
    Ok(())
}
