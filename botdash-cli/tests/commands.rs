use std::time::Duration;

use anyhow::Result;
use botdash_cli::app::{BotArgs, ClientSettings, LoginArgs, LogsArgs, TradeArgs, WatchArgs};
use botdash_cli::shutdown::ShutdownSignal;
use botdash_core::{Side, VenueKind};
use botdash_sync::SyncSettings;
use botdash_test_utils::{MockBotServer, MockServerConfig};
use botdash_transport::{HttpApiConfig, SocketConfig};
use serde_json::json;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn settings(server: &MockBotServer) -> ClientSettings {
    ClientSettings {
        api: HttpApiConfig {
            base_url: server.rest_url(),
            ..HttpApiConfig::default()
        },
        socket: SocketConfig {
            server_url: server.socket_url(),
            namespace: "/v1".into(),
            connect_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(50),
            reconnect_delay_max: Duration::from_millis(200),
        },
        sync: SyncSettings::default(),
        token: None,
        metrics_addr: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_and_resume_toggle_the_bot() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["alpha"])).await?;
    let settings = settings(&server);
    let args = BotArgs {
        bot: "alpha".into(),
    };

    args.pause(&settings).await?;
    assert!(server.state().is_paused("alpha").await);
    args.resume(&settings).await?;
    assert!(!server.state().is_paused("alpha").await);

    let missing = BotArgs {
        bot: "ghost".into(),
    };
    assert!(missing.pause(&settings).await.is_err());
    assert!(missing.resume(&settings).await.is_err());

    // One-shot bot actions talk REST only.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(server.state().namespace_joins().await, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn trade_submits_normalized_pair() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["alpha"])).await?;
    let args = TradeArgs {
        bot: "alpha".into(),
        side: Side::Buy,
        amount: 5.0,
        venue: VenueKind::Dex,
        pair: "sei-usdc".into(),
    };
    args.run(&settings(&server)).await?;

    let trades = server.state().trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].0, "alpha");
    assert_eq!(trades[0].1["currencyPair"], "SEI-USDC");
    assert_eq!(trades[0].1["exchange"], "dex");

    let invalid = TradeArgs { amount: 0.0, ..args };
    assert!(invalid.run(&settings(&server)).await.is_err());
    assert_eq!(server.state().trades().await.len(), 1);

    let ghost = TradeArgs {
        bot: "ghost".into(),
        amount: 1.0,
        ..invalid
    };
    assert!(ghost.run(&settings(&server)).await.is_err());
    assert_eq!(server.state().trades().await.len(), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(server.state().namespace_joins().await, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn logs_exit_after_requested_lines() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["alpha"])).await?;
    let settings = settings(&server);
    let args = LogsArgs {
        bot: "alpha".into(),
        lines: Some(2),
    };
    let task = tokio::spawn(async move { args.run(&settings, ShutdownSignal::manual()).await });

    let state = server.state();
    timeout(WAIT, async {
        while state.namespace_joins().await < 1 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    for message in ["one", "two", "three"] {
        server
            .emit("log/alpha", json!({ "message": message, "botId": "alpha" }))
            .await;
    }
    timeout(WAIT, task).await???;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_stops_on_shutdown() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["alpha", "beta"])).await?;
    let settings = settings(&server);
    let shutdown = ShutdownSignal::manual();
    let signal = shutdown.clone();
    let task = tokio::spawn(async move {
        WatchArgs {
            interval: 1,
            quiet: false,
        }
        .run(&settings, signal)
        .await
    });

    let state = server.state();
    timeout(WAIT, async {
        while state.namespace_joins().await < 1 || state.request_count("/state").await < 2 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    shutdown.trigger();
    timeout(WAIT, task).await???;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn login_waits_for_pushed_token() -> Result<()> {
    let mut config = MockServerConfig::with_bots(["alpha"]);
    config.auth_url = Some("https://auth.example/login".into());
    let server = MockBotServer::start(config).await?;
    let settings = settings(&server);
    let args = LoginArgs {
        provider: "github".into(),
        timeout: 5,
    };
    let task = tokio::spawn(async move { args.run(&settings, ShutdownSignal::manual()).await });

    let state = server.state();
    timeout(WAIT, async {
        while !state
            .client_events()
            .await
            .iter()
            .any(|(name, _)| name == "request-auth-url")
        {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    server.emit("auth-token", json!({ "token": "tok-123" })).await;

    let token = timeout(WAIT, task).await???;
    assert_eq!(token, "tok-123");
    Ok(())
}
