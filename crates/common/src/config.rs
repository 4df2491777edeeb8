use std::time::Duration;

use crate::{Error, Mode, Result};

/// Where trade intents are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Csv,
    Sqlite,
}

/// How live quotes are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveFeed {
    /// Poll the Finnhub REST quote endpoint every cycle.
    Rest,
    /// Keep a Finnhub trade websocket open and poll its latest trade.
    Stream,
}

/// Process configuration loaded from environment variables at startup.
/// Immutable afterwards; components receive what they need at construction.
#[derive(Debug, Clone)]
pub struct Config {
    // Data source
    pub finnhub_api_key: String,
    pub symbols: Vec<String>,
    pub live_feed: LiveFeed,
    pub fetch_timeout: Duration,

    // Mode
    pub mode: Mode,

    // Live polling
    pub poll_interval: Duration,
    pub fetch_retries: u32,
    pub retry_delay: Duration,

    // Historical data
    pub history_csv_dir: Option<String>,
    pub history_resolution: String,
    pub history_days: i64,

    // Paper account
    pub initial_cash: f64,
    pub paper_slippage_bps: f64,

    // Ledger
    pub ledger_backend: LedgerBackend,
    pub csv_path: String,
    pub database_url: Option<String>,

    // Strategy config file path (indicator periods, risk parameters)
    pub strategy_config_path: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Any missing or malformed required variable
    /// is an `Error::Config`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mode: Mode = env.required("MODE")?.parse().map_err(Error::Config)?;

        let symbols: Vec<String> = env
            .required("SYMBOLS")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(Error::Config("SYMBOLS must list at least one symbol".into()));
        }

        let live_feed = match env.optional("LIVE_FEED").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("rest") => LiveFeed::Rest,
            Some("stream") => LiveFeed::Stream,
            Some(other) => {
                return Err(Error::Config(format!(
                    "LIVE_FEED must be 'rest' or 'stream', got: '{other}'"
                )))
            }
        };

        let ledger_backend = match env.optional("LEDGER_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("csv") => LedgerBackend::Csv,
            Some("sqlite") => LedgerBackend::Sqlite,
            Some(other) => {
                return Err(Error::Config(format!(
                    "LEDGER_BACKEND must be 'csv' or 'sqlite', got: '{other}'"
                )))
            }
        };

        let history_csv_dir = env.optional("HISTORY_CSV_DIR");

        // Finnhub is only optional for offline backtests over local CSV files.
        let needs_finnhub = mode == Mode::Live || history_csv_dir.is_none();
        let finnhub_api_key = match env.optional("FINNHUB_API_KEY") {
            Some(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ if needs_finnhub => {
                return Err(Error::Config(
                    "Required environment variable 'FINNHUB_API_KEY' is not set. Check your .env file."
                        .into(),
                ))
            }
            _ => String::new(),
        };

        let csv_path = match ledger_backend {
            LedgerBackend::Csv => env.required("CSV_PATH")?,
            LedgerBackend::Sqlite => env.optional("CSV_PATH").unwrap_or_default(),
        };
        let database_url = match ledger_backend {
            LedgerBackend::Sqlite => Some(env.required("DATABASE_URL")?),
            LedgerBackend::Csv => env.optional("DATABASE_URL"),
        };

        let fetch_retries: u32 = env.parsed("FETCH_RETRIES", 3)?;
        if fetch_retries == 0 {
            return Err(Error::Config("FETCH_RETRIES must be at least 1".into()));
        }

        let poll_interval_secs: u64 = env.parsed("POLL_INTERVAL_SECS", 5)?;
        if poll_interval_secs == 0 {
            return Err(Error::Config("POLL_INTERVAL_SECS must be at least 1".into()));
        }

        let initial_cash: f64 = env.parsed("INITIAL_CASH", 1000.0)?;
        if !initial_cash.is_finite() || initial_cash < 0.0 {
            return Err(Error::Config(format!(
                "INITIAL_CASH must be a non-negative number, got: {initial_cash}"
            )));
        }

        Ok(Config {
            finnhub_api_key,
            symbols,
            live_feed,
            fetch_timeout: Duration::from_secs(env.parsed("FETCH_TIMEOUT_SECS", 10)?),
            mode,
            poll_interval: Duration::from_secs(poll_interval_secs),
            fetch_retries,
            retry_delay: Duration::from_secs(env.parsed("RETRY_DELAY_SECS", 5)?),
            history_csv_dir,
            history_resolution: env
                .optional("HISTORY_RESOLUTION")
                .unwrap_or_else(|| "D".to_string()),
            history_days: env.parsed("HISTORY_DAYS", 365)?,
            initial_cash,
            paper_slippage_bps: env.parsed("PAPER_SLIPPAGE_BPS", 0.0)?,
            ledger_backend,
            csv_path,
            database_url,
            strategy_config_path: env.optional("STRATEGY_CONFIG_PATH"),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String> {
        self.optional(key).ok_or_else(|| {
            Error::Config(format!(
                "Required environment variable '{key}' is not set. Check your .env file."
            ))
        })
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::Config(format!("{key} has an invalid value: '{raw}'"))
            }),
        }
    }
}
