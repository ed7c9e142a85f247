use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use botdash_core::{ManualTradeArgs, Side, VenueKind};
use botdash_test_utils::{MockBotServer, MockServerConfig, Scenario, ScenarioTrigger};
use botdash_transport::{BotApi, HttpApiConfig, HttpBotApi, Session, TransportError};
use hyper::StatusCode;

fn client(server: &MockBotServer, session: Session) -> Result<HttpBotApi> {
    Ok(HttpBotApi::new(
        HttpApiConfig {
            base_url: server.rest_url(),
            ..HttpApiConfig::default()
        },
        session,
    )?)
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_roster_and_venue_data() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let config = MockServerConfig::with_bots(["bot1", "bot2"])
        .price(VenueKind::Cex, "SEI-USDT", Some(0.42))
        .price(VenueKind::Dex, "SEI-USDC", None)
        .liquidity(VenueKind::Dex, "SEI", 1_500.0);
    let server = MockBotServer::start(config).await?;
    let api = client(&server, Session::default())?;

    assert_eq!(api.list_bots().await?, vec!["bot1", "bot2"]);
    assert_eq!(api.bot_state("bot1").await?.as_value()["status"], "running");

    let cex = api.prices("bot1", VenueKind::Cex).await?;
    assert_eq!(cex.get("SEI-USDT"), Some(&Some(0.42)));
    let dex = api.prices("bot1", VenueKind::Dex).await?;
    assert_eq!(dex.get("SEI-USDC"), Some(&None));

    let all = api.all_prices("bot1").await?;
    assert_eq!(all.cex.len(), 1);
    assert_eq!(all.dex.len(), 1);

    let liquidity = api.liquidity("bot1", VenueKind::Dex).await?;
    assert_eq!(liquidity.kind, Some(VenueKind::Dex));
    assert_eq!(liquidity.liquidity[0].symbol, "SEI");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn attaches_bearer_token_when_present() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"]).token("jwt-1")).await?;
    let api = client(&server, Session::new(Some("jwt-1".into())))?;
    api.pause("bot1").await?;
    assert!(server.state().is_paused("bot1").await);
    api.resume("bot1").await?;
    assert!(!server.state().is_paused("bot1").await);

    let requests = server.state().requests().await;
    assert!(requests
        .iter()
        .all(|req| req.authorization.as_deref() == Some("Bearer jwt-1")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn omits_authorization_without_token() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    let api = client(&server, Session::default())?;
    api.list_bots().await?;
    let requests = server.state().requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].authorization.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_response_logs_the_session_out() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"]).token("fresh")).await?;
    let session = Session::new(Some("stale".into()));
    let redirects = Arc::new(AtomicUsize::new(0));
    let counter = redirects.clone();
    session.on_logout(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let api = client(&server, session.clone())?;

    let err = api.list_bots().await.expect_err("stale token must be rejected");
    assert!(err.is_unauthorized());
    assert!(!session.is_logged_in());
    assert_eq!(redirects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_surface_status_and_body() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    server
        .state()
        .scenarios()
        .push(Scenario::fail(
            "state outage",
            ScenarioTrigger::BotState,
            StatusCode::SERVICE_UNAVAILABLE,
            "bot offline",
        ))
        .await;
    let api = client(&server, Session::default())?;
    match api.bot_state("bot1").await {
        Err(TransportError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert!(body.contains("bot offline"));
        }
        other => panic!("unexpected result {other:?}"),
    }
    // Scenarios fire once.
    api.bot_state("bot1").await?;

    match api.bot_state("ghost").await {
        Err(TransportError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("unexpected result {other:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_trade_posts_camel_case_body() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    let api = client(&server, Session::default())?;
    let reply = api
        .manual_trade(
            "bot1",
            &ManualTradeArgs {
                side: Side::Buy,
                amount: 25.0,
                exchange: VenueKind::Dex,
                currency_pair: "SEI-USDT".into(),
            },
        )
        .await?;
    assert_eq!(reply["status"], "submitted");

    let trades = server.state().trades().await;
    assert_eq!(trades.len(), 1);
    let (bot, body) = &trades[0];
    assert_eq!(bot, "bot1");
    assert_eq!(body["currencyPair"], "SEI-USDT");
    assert_eq!(body["side"], "buy");
    assert_eq!(body["exchange"], "dex");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_responses_hit_the_request_timeout() -> Result<()> {
    let server = MockBotServer::start(MockServerConfig::with_bots(["bot1"])).await?;
    server
        .state()
        .scenarios()
        .push(Scenario::delay(
            "slow roster",
            ScenarioTrigger::ListBots,
            Duration::from_secs(2),
        ))
        .await;
    let api = HttpBotApi::new(
        HttpApiConfig {
            base_url: server.rest_url(),
            request_timeout: Duration::from_millis(200),
            ..HttpApiConfig::default()
        },
        Session::default(),
    )?;
    assert!(matches!(
        api.list_bots().await,
        Err(TransportError::Transport(_))
    ));
    assert_eq!(api.list_bots().await?, vec!["bot1".to_string()]);
    Ok(())
}
