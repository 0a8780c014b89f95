use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use tradewind::core::{Config, MarketFeed, OrderVenue, RunMode};
use tradewind::executor::TradeExecutor;
use tradewind::feeds::RestMarketFeed;
use tradewind::ledger::TradeLedger;
use tradewind::venues::{PaperVenue, RestVenue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Initialize logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tradewind=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    // 2. Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Arc::new(Config::load(&config_path)?);
    tracing::info!(path = %config_path.display(), mode = ?config.app.mode, "configuration loaded");

    // 3. Wire up feed, venue and ledger per run mode
    let feed: Arc<dyn MarketFeed> = Arc::new(RestMarketFeed::new(
        "rest",
        config.app.feed_url.clone(),
        config.execution.venue_timeout_ms,
    )?);

    let venue: Arc<dyn OrderVenue> = match config.app.mode {
        RunMode::Paper => Arc::new(PaperVenue::new(&config.backtest)),
        RunMode::Live => {
            let url = config
                .app
                .venue_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("live mode requires app.venue_url"))?;
            Arc::new(RestVenue::new(
                "rest",
                url,
                config.execution.venue_timeout_ms,
            )?)
        }
    };

    let ledger = Arc::new(match &config.app.trade_log {
        Some(path) => TradeLedger::with_file(path)?,
        None => TradeLedger::new(),
    });

    // 4. Run until ctrl-c, then reconcile open orders and exit
    let executor = Arc::new(TradeExecutor::new(config, feed, venue, ledger));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let runner = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, shutting down");
    shutdown_tx.send(true)?;
    runner.await??;

    Ok(())
}
