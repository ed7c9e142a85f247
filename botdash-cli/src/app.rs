use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use botdash_config::{load_config, AppConfig};
use botdash_core::{ManualTradeArgs, Side, VenueKind};
use botdash_sync::{DashboardStore, LogAggregator, SnapshotOutcome, SyncSettings};
use botdash_transport::{
    request_auth_url, BotApi, EventChannel, HttpApiConfig, HttpBotApi, Session, SocketChannel,
    SocketConfig,
};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::render;
use crate::shutdown::ShutdownSignal;
use crate::telemetry::{
    init_tracing, spawn_metrics_sampler, spawn_metrics_server, DashboardMetrics,
};

#[derive(Parser)]
#[command(author, version, about = "Bot dashboard client")]
pub struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long, default_value = "default")]
    env: String,
    /// Bearer token for REST calls, overriding the configured one
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a snapshot and follow live updates until Ctrl-C
    Watch(WatchArgs),
    /// List the bots known to the server
    Bots,
    /// Stream one bot's log lines
    Logs(LogsArgs),
    /// Pause a running bot
    Pause(BotArgs),
    /// Resume a paused bot
    Resume(BotArgs),
    /// Submit a manual trade on behalf of a bot
    Trade(TradeArgs),
    /// Log in through an identity provider and print the session token
    Login(LoginArgs),
}

/// Everything a command needs to reach the server.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub api: HttpApiConfig,
    pub socket: SocketConfig,
    pub sync: SyncSettings,
    pub token: Option<String>,
    pub metrics_addr: Option<SocketAddr>,
}

impl ClientSettings {
    pub fn from_config(config: &AppConfig, token: Option<String>) -> Self {
        Self {
            api: HttpApiConfig {
                base_url: config.api_base_url(),
                connect_timeout: config.transport.connect_timeout(),
                request_timeout: config.transport.request_timeout(),
            },
            socket: SocketConfig {
                server_url: config.server_url.clone(),
                namespace: config.namespace.clone(),
                connect_timeout: config.transport.connect_timeout(),
                reconnect_delay: config.transport.reconnect_delay(),
                reconnect_delay_max: config.transport.reconnect_delay_max(),
            },
            sync: SyncSettings::from(&config.sync),
            token: token.or_else(|| config.token.clone()),
            metrics_addr: config.metrics_addr,
        }
    }

    fn session(&self) -> Session {
        let session = Session::new(self.token.clone());
        session.on_logout(|| warn!("session rejected by the server, run `botdash login`"));
        session
    }

    fn api(&self, session: Session) -> Result<Arc<HttpBotApi>> {
        let api = HttpBotApi::new(self.api.clone(), session)
            .context("failed to build REST client")?;
        Ok(Arc::new(api))
    }

    fn channel(&self) -> Arc<SocketChannel> {
        Arc::new(SocketChannel::open(self.socket.clone()))
    }

    fn store(&self) -> Result<DashboardStore> {
        let api = self.api(self.session())?;
        Ok(DashboardStore::new(api, self.channel(), self.sync.clone()))
    }
}

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between summary refreshes
    #[arg(long, default_value_t = 5)]
    pub interval: u64,
    /// Do not print log lines as they arrive
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct LogsArgs {
    pub bot: String,
    /// Exit after this many lines
    #[arg(long)]
    pub lines: Option<usize>,
}

#[derive(Args)]
pub struct BotArgs {
    pub bot: String,
}

#[derive(Args)]
pub struct TradeArgs {
    pub bot: String,
    #[arg(long)]
    pub side: Side,
    #[arg(long)]
    pub amount: f64,
    #[arg(long, default_value = "cex")]
    pub venue: VenueKind,
    #[arg(long)]
    pub pair: String,
}

#[derive(Args)]
pub struct LoginArgs {
    /// Identity provider, e.g. `google`
    #[arg(long, default_value = "google")]
    pub provider: String,
    /// Seconds to wait for the login to complete
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(Some(&cli.env)).context("failed to load configuration")?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    });
    init_tracing(&filter, config.log_path.as_deref()).context("failed to initialize logging")?;

    let settings = ClientSettings::from_config(&config, cli.token);
    match cli.command {
        Commands::Watch(args) => args.run(&settings, ShutdownSignal::new()).await?,
        Commands::Bots => list_bots(&settings).await?,
        Commands::Logs(args) => args.run(&settings, ShutdownSignal::new()).await?,
        Commands::Pause(args) => args.pause(&settings).await?,
        Commands::Resume(args) => args.resume(&settings).await?,
        Commands::Trade(args) => args.run(&settings).await?,
        Commands::Login(args) => {
            let token = args.run(&settings, ShutdownSignal::new()).await?;
            println!("logged in, export BOTDASH__TOKEN={token} to reuse the session");
        }
    }
    Ok(())
}

async fn list_bots(settings: &ClientSettings) -> Result<()> {
    let api = settings.api(settings.session())?;
    let bots = api.list_bots().await.context("failed to list bots")?;
    if bots.is_empty() {
        println!("no bots registered");
    }
    for bot in bots {
        println!("{bot}");
    }
    Ok(())
}

impl WatchArgs {
    pub async fn run(&self, settings: &ClientSettings, shutdown: ShutdownSignal) -> Result<()> {
        if self.interval == 0 {
            bail!("--interval must be positive");
        }
        let store = Arc::new(settings.store()?);
        match store.initialize().await {
            Ok(SnapshotOutcome::Empty) => warn!("server reported no bots"),
            Ok(SnapshotOutcome::Loaded { bots, failures }) => {
                info!(bots = bots.len(), failures, "dashboard ready");
            }
            Err(err) => warn!(error = %err, "initial snapshot failed, waiting for live updates"),
        }

        let mut tasks = Vec::new();
        if let Some(addr) = settings.metrics_addr {
            let metrics = Arc::new(DashboardMetrics::new()?);
            tasks.push(spawn_metrics_server(metrics.registry(), addr));
            tasks.push(spawn_metrics_sampler(
                store.clone(),
                metrics,
                Duration::from_secs(self.interval),
                shutdown.clone(),
            ));
        }

        let mut feed = store.logs().subscribe();
        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    println!(
                        "{}",
                        render::summary(
                            &store.snapshot(),
                            &settings.sync.pinned_pair,
                            store.is_connected(),
                            &store.loading(),
                            |bot| store.logs().len(bot),
                        )
                    );
                }
                line = feed.recv() => match line {
                    Ok(entry) if !self.quiet => println!("{}", render::log_line(&entry)),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "log output fell behind"),
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.wait() => break,
            }
        }

        info!("shutting down dashboard");
        store.cleanup();
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}

impl LogsArgs {
    /// Print log lines for one bot until `--lines` is reached or shutdown.
    pub async fn run(&self, settings: &ClientSettings, shutdown: ShutdownSignal) -> Result<()> {
        let channel = settings.channel();
        let logs = LogAggregator::new(channel.clone(), settings.sync.max_logs_per_bot);
        let mut feed = logs.subscribe();
        logs.attach(std::slice::from_ref(&self.bot));

        let mut printed = 0usize;
        while self.lines.map_or(true, |limit| printed < limit) {
            tokio::select! {
                line = feed.recv() => match line {
                    Ok(entry) => {
                        println!("{}", render::log_line(&entry));
                        printed += 1;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "log output fell behind"),
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.wait() => break,
            }
        }
        logs.detach(std::slice::from_ref(&self.bot));
        channel.disconnect();
        Ok(())
    }
}

impl BotArgs {
    pub async fn pause(&self, settings: &ClientSettings) -> Result<()> {
        let api = settings.api(settings.session())?;
        api.pause(&self.bot)
            .await
            .with_context(|| format!("failed to pause bot {}", self.bot))?;
        println!("paused {}", self.bot);
        Ok(())
    }

    pub async fn resume(&self, settings: &ClientSettings) -> Result<()> {
        let api = settings.api(settings.session())?;
        api.resume(&self.bot)
            .await
            .with_context(|| format!("failed to resume bot {}", self.bot))?;
        println!("resumed {}", self.bot);
        Ok(())
    }
}

impl TradeArgs {
    pub async fn run(&self, settings: &ClientSettings) -> Result<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            bail!("--amount must be positive");
        }
        let args = ManualTradeArgs {
            side: self.side,
            amount: self.amount,
            exchange: self.venue,
            currency_pair: self.pair.to_uppercase(),
        };
        let api = settings.api(settings.session())?;
        let result = api
            .manual_trade(&self.bot, &args)
            .await
            .context("manual trade failed")?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}

impl LoginArgs {
    /// Request a login URL, then wait for the server to push the session token.
    pub async fn run(&self, settings: &ClientSettings, shutdown: ShutdownSignal) -> Result<String> {
        let session = Session::default();
        let channel = settings.channel();
        let listener = session.listen_for_token(channel.as_ref());
        let wait = settings.socket.connect_timeout * 2;
        let url = request_auth_url(channel.as_ref(), &self.provider, wait)
            .await
            .context("failed to obtain a login url")?;
        println!("open this url to log in: {url}");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.timeout);
        let outcome = loop {
            if let Some(token) = session.token() {
                break Ok(token);
            }
            if tokio::time::Instant::now() >= deadline {
                break Err(anyhow!("timed out waiting for login"));
            }
            if !shutdown.sleep(Duration::from_millis(100)).await {
                break Err(anyhow!("login interrupted"));
            }
        };
        channel.unsubscribe(listener);
        channel.disconnect();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_arguments() {
        let cli = Cli::try_parse_from([
            "botdash", "-vv", "--env", "staging", "trade", "alpha", "--side", "sell",
            "--amount", "12.5", "--venue", "dex", "--pair", "sei-usdt",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.env, "staging");
        match cli.command {
            Commands::Trade(args) => {
                assert_eq!(args.bot, "alpha");
                assert_eq!(args.side, Side::Sell);
                assert_eq!(args.venue, VenueKind::Dex);
                assert_eq!(args.amount, 12.5);
            }
            _ => panic!("expected trade command"),
        }
    }

    #[test]
    fn rejects_unknown_venue() {
        let result = Cli::try_parse_from([
            "botdash", "trade", "alpha", "--side", "buy", "--amount", "1", "--venue", "otc",
            "--pair", "SEI-USDT",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn settings_follow_configuration() {
        let mut config = AppConfig {
            server_url: "http://bots.local:6900/".into(),
            token: Some("from-config".into()),
            ..AppConfig::default()
        };
        config.transport.reconnect_delay_ms = 250;
        let settings = ClientSettings::from_config(&config, None);
        assert_eq!(settings.api.base_url, "http://bots.local:6900/api/v1");
        assert_eq!(settings.socket.namespace, "/v1");
        assert_eq!(settings.socket.reconnect_delay, Duration::from_millis(250));
        assert_eq!(settings.token.as_deref(), Some("from-config"));

        let settings = ClientSettings::from_config(&config, Some("flag".into()));
        assert_eq!(settings.token.as_deref(), Some("flag"));
    }
}
