use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use common::{Action, Error, Ledger, Result, TradeIntent};

use super::LEDGER_HEADER;

/// Append-only CSV trade log.
///
/// The header is written only when the file is new or empty. SELL rows carry
/// the running realized P&L; BUY rows carry `-`. Reopening an existing file
/// resumes the running total from its last SELL row.
pub struct CsvLedger {
    path: PathBuf,
    /// Running realized P&L. Held for the whole append so rows stay ordered.
    cumulative_pnl: Arc<Mutex<f64>>,
}

impl CsvLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cumulative = if path.exists() {
            last_cumulative_pnl(&path)?
        } else {
            0.0
        };
        info!(path = %path.display(), cumulative_pnl = cumulative, "CSV ledger ready");
        Ok(Self {
            path,
            cumulative_pnl: Arc::new(Mutex::new(cumulative)),
        })
    }
}

#[async_trait]
impl Ledger for CsvLedger {
    async fn record(&self, intent: &TradeIntent) -> Result<()> {
        let path = self.path.clone();
        let cumulative = self.cumulative_pnl.clone();
        let intent = intent.clone();

        tokio::task::spawn_blocking(move || append_row(&path, &cumulative, &intent))
            .await
            .map_err(|e| Error::Ledger(format!("ledger writer task failed: {e}")))?
    }
}

fn append_row(path: &Path, cumulative: &Mutex<f64>, intent: &TradeIntent) -> Result<()> {
    let mut total = cumulative
        .lock()
        .map_err(|_| Error::Ledger("cumulative P&L lock poisoned".into()))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Ledger(format!("cannot open {}: {e}", path.display())))?;
    let is_new = file
        .metadata()
        .map_err(|e| Error::Ledger(format!("cannot stat {}: {e}", path.display())))?
        .len()
        == 0;

    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if is_new {
        wtr.write_record(LEDGER_HEADER)?;
    }

    let next_total = match (intent.action, intent.realized_pnl) {
        (Action::Sell, Some(pnl)) => Some(*total + pnl),
        (Action::Sell, None) => Some(*total),
        (Action::Buy, _) => None,
    };
    let cumulative_cell = next_total.map_or_else(|| "-".to_string(), |t| t.to_string());

    wtr.write_record([
        intent.timestamp.to_rfc3339(),
        intent.symbol.clone(),
        intent.action.to_string(),
        intent.price.to_string(),
        intent.quantity.to_string(),
        intent.notional().to_string(),
        cumulative_cell,
    ])?;
    wtr.flush()?;

    if let Some(t) = next_total {
        *total = t;
    }
    debug!(symbol = %intent.symbol, action = %intent.action, path = %path.display(), "Ledger row appended");
    Ok(())
}

fn last_cumulative_pnl(path: &Path) -> Result<f64> {
    let file = File::open(path)
        .map_err(|e| Error::Ledger(format!("cannot read {}: {e}", path.display())))?;
    let mut reader = csv::Reader::from_reader(file);
    let mut last = 0.0;
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(6).and_then(|cell| cell.parse::<f64>().ok()) {
            last = value;
        }
    }
    Ok(last)
}
