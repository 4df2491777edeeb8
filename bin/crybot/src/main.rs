use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{BarSource, Broker, Config, Ledger, LedgerBackend, LiveFeed, Mode, QuoteSource};
use engine::{
    run_backtest, CsvBarSource, CsvLedger, FinnhubClient, FinnhubStream, LatestQuotes,
    PollingController, PollingSettings, RetryPolicy, SqliteLedger,
};
use paper::PaperBroker;
use strategy::{DecisionEngine, StrategyFileConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("Invalid configuration")?;
    let strategy_cfg = StrategyFileConfig::load_or_default(cfg.strategy_config_path.as_deref())
        .context("Invalid strategy configuration")?;
    info!(mode = %cfg.mode, symbols = ?cfg.symbols, "crybot starting");

    // ── Ledger ────────────────────────────────────────────────────────────────
    let ledger = build_ledger(&cfg).await?;

    // ── Paper account ─────────────────────────────────────────────────────────
    let risk = Arc::new(strategy_cfg.risk.clone());
    let broker = Arc::new(PaperBroker::new(
        cfg.initial_cash,
        risk.trading_fee_fraction,
        cfg.paper_slippage_bps,
    ));

    // ── One decision engine per symbol ────────────────────────────────────────
    let engines: Vec<DecisionEngine> = cfg
        .symbols
        .iter()
        .map(|symbol| DecisionEngine::new(symbol.clone(), &strategy_cfg.indicators, risk.clone()))
        .collect();

    match cfg.mode {
        Mode::Historical => run_historical(&cfg, engines, &broker, ledger.as_ref()).await,
        Mode::Live => run_live(&cfg, engines, broker, ledger).await,
    }
}

async fn build_ledger(cfg: &Config) -> Result<Arc<dyn Ledger>> {
    match cfg.ledger_backend {
        LedgerBackend::Csv => {
            let ledger = CsvLedger::open(&cfg.csv_path)
                .with_context(|| format!("Failed to open CSV ledger at {}", cfg.csv_path))?;
            Ok(Arc::new(ledger))
        }
        LedgerBackend::Sqlite => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the sqlite ledger")?;
            let ledger = SqliteLedger::connect(url)
                .await
                .with_context(|| format!("Failed to open ledger database at {url}"))?;
            Ok(Arc::new(ledger))
        }
    }
}

async fn run_historical(
    cfg: &Config,
    engines: Vec<DecisionEngine>,
    broker: &PaperBroker,
    ledger: &dyn Ledger,
) -> Result<()> {
    let source: Box<dyn BarSource> = match &cfg.history_csv_dir {
        Some(dir) => {
            info!(dir = %dir, "Reading history from CSV files");
            Box::new(CsvBarSource::new(dir))
        }
        None => {
            info!(
                resolution = %cfg.history_resolution,
                days = cfg.history_days,
                "Fetching history from Finnhub"
            );
            Box::new(
                FinnhubClient::new(&cfg.finnhub_api_key, cfg.fetch_timeout)?
                    .with_history(&cfg.history_resolution, cfg.history_days),
            )
        }
    };

    let report = run_backtest(engines, source.as_ref(), broker, ledger)
        .await
        .context("Backtest failed")?;
    println!("{}", report.to_json()?);
    Ok(())
}

async fn run_live(
    cfg: &Config,
    engines: Vec<DecisionEngine>,
    broker: Arc<PaperBroker>,
    ledger: Arc<dyn Ledger>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Quote source ──────────────────────────────────────────────────────────
    let mut stream_task = None;
    let source: Arc<dyn QuoteSource> = match cfg.live_feed {
        LiveFeed::Rest => {
            info!("Live feed: Finnhub REST quotes");
            Arc::new(FinnhubClient::new(&cfg.finnhub_api_key, cfg.fetch_timeout)?)
        }
        LiveFeed::Stream => {
            // Trades older than six polling intervals (at least a minute) are stale.
            let max_age = (cfg.poll_interval * 6).max(Duration::from_secs(60));
            info!(max_age = ?max_age, "Live feed: Finnhub trade stream");
            let quotes = LatestQuotes::new(max_age);
            let stream = FinnhubStream::new(&cfg.finnhub_api_key, cfg.symbols.clone(), quotes.clone());
            stream_task = Some(tokio::spawn(stream.run(shutdown_rx.clone())));
            Arc::new(quotes)
        }
    };

    // ── Polling controller ────────────────────────────────────────────────────
    let settings = PollingSettings {
        interval: cfg.poll_interval,
        retry: RetryPolicy {
            max_attempts: cfg.fetch_retries,
            delay: cfg.retry_delay,
        },
        fetch_timeout: cfg.fetch_timeout,
    };
    let mut controller = PollingController::new(source, broker.clone(), ledger, settings);
    for engine in engines {
        controller.add_engine(engine);
    }
    let polling = tokio::spawn(controller.run(shutdown_rx));

    info!("Polling started. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received. Finishing current cycles.");
    let _ = shutdown_tx.send(true);

    if let Err(e) = polling.await {
        error!(error = %e, "Polling controller task failed");
    }
    if let Some(stream) = stream_task {
        if let Err(e) = stream.await {
            error!(error = %e, "Finnhub stream task failed");
        }
    }
    info!(cash = broker.available_cash().await, "crybot stopped");
    Ok(())
}
