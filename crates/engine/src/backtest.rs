//! Historical simulation: replays bar history through one decision engine per
//! symbol against the paper broker.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{error, info, warn};

use common::{Action, BarSource, Broker, Error, Ledger, PositionStatus, Result, TradeIntent};
use paper::PaperBroker;
use strategy::{DecisionEngine, SignalSource};

/// Per-symbol totals of a backtest.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub bars: usize,
    pub entries: usize,
    pub exits: usize,
    /// Intents the broker refused; the engine's position was restored.
    pub rejected: usize,
    /// Sale proceeds minus entry cost of closed round trips, from fills.
    pub realized_pnl: f64,
    /// Position left open when history ran out.
    pub final_status: PositionStatus,
    pub last_close: Option<f64>,
}

/// Outcome of a complete backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub initial_cash: f64,
    pub final_cash: f64,
    /// Cash plus open positions marked at each symbol's last close.
    pub final_equity: f64,
    pub realized_pnl: f64,
    pub bars_processed: usize,
    /// Filled intents, in execution order.
    pub intents: Vec<TradeIntent>,
    pub symbols: Vec<SymbolSummary>,
    /// Symbols whose history could not be loaded.
    pub skipped_symbols: Vec<String>,
}

impl BacktestReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Load history for every engine's symbol, merge the bars by timestamp and
/// step each engine with the broker's available cash.
///
/// An intent the broker rejects is rolled back in its engine and never
/// reaches the ledger or the report.
///
/// Ties on timestamp keep the order engines were given in. A symbol whose
/// history fails to load is skipped with a warning; the run fails only when
/// no symbol has data.
pub async fn run_backtest<S: SignalSource>(
    mut engines: Vec<DecisionEngine<S>>,
    source: &dyn BarSource,
    broker: &PaperBroker,
    ledger: &dyn Ledger,
) -> Result<BacktestReport> {
    let initial_cash = broker.cash().await;

    let mut timeline = Vec::new();
    let mut skipped_symbols = Vec::new();
    let mut summaries = Vec::with_capacity(engines.len());
    for (idx, engine) in engines.iter().enumerate() {
        let symbol = engine.symbol().to_string();
        match source.bars(&symbol).await {
            Ok(bars) => {
                info!(symbol = %symbol, bars = bars.len(), warmup = engine.warmup_len(), "History loaded");
                if bars.len() < engine.warmup_len() {
                    warn!(symbol = %symbol, "History shorter than indicator warm-up; no trades possible");
                }
                summaries.push(SymbolSummary {
                    symbol,
                    bars: bars.len(),
                    entries: 0,
                    exits: 0,
                    rejected: 0,
                    realized_pnl: 0.0,
                    final_status: PositionStatus::Flat,
                    last_close: None,
                });
                timeline.extend(bars.into_iter().map(|bar| (idx, bar)));
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Skipping symbol without history");
                skipped_symbols.push(symbol.clone());
                summaries.push(SymbolSummary {
                    symbol,
                    bars: 0,
                    entries: 0,
                    exits: 0,
                    rejected: 0,
                    realized_pnl: 0.0,
                    final_status: PositionStatus::Flat,
                    last_close: None,
                });
            }
        }
    }

    if !engines.is_empty() && skipped_symbols.len() == engines.len() {
        return Err(Error::DataUnavailable(format!(
            "no history for any symbol: {}",
            skipped_symbols.join(", ")
        )));
    }

    // Stable: equal timestamps keep symbol order.
    timeline.sort_by_key(|(_, bar)| bar.timestamp);

    let mut intents = Vec::new();
    // Cash paid for each symbol's open position, fees included.
    let mut entry_costs = vec![0.0; engines.len()];
    for (idx, bar) in &timeline {
        let cash = broker.available_cash().await;
        let summary = &mut summaries[*idx];
        summary.last_close = Some(bar.close);

        let engine = &mut engines[*idx];
        let Some(intent) = engine.next(bar, cash) else {
            continue;
        };
        let fill = match broker.execute(&intent).await {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %intent.symbol, action = %intent.action, error = %e, "Broker rejected intent");
                engine.reject(&intent);
                summary.rejected += 1;
                continue;
            }
        };

        let gross = fill.fill_price * fill.quantity;
        match fill.action {
            Action::Buy => {
                summary.entries += 1;
                entry_costs[*idx] = gross + fill.fee;
            }
            Action::Sell => {
                summary.exits += 1;
                summary.realized_pnl += gross - fill.fee - std::mem::take(&mut entry_costs[*idx]);
            }
        }
        if let Err(e) = ledger.record(&intent).await {
            error!(symbol = %intent.symbol, id = %intent.id, error = %e, "Failed to record intent");
        }
        intents.push(intent);
    }

    let mut marks = HashMap::new();
    for (summary, engine) in summaries.iter_mut().zip(&engines) {
        summary.final_status = engine.position().status;
        if let Some(close) = summary.last_close {
            marks.insert(summary.symbol.clone(), close);
        }
    }

    let report = BacktestReport {
        initial_cash,
        final_cash: broker.cash().await,
        final_equity: broker.equity(&marks).await,
        realized_pnl: summaries.iter().map(|s| s.realized_pnl).sum(),
        bars_processed: timeline.len(),
        intents,
        symbols: summaries,
        skipped_symbols,
    };

    info!(
        bars = report.bars_processed,
        trades = report.intents.len(),
        realized_pnl = report.realized_pnl,
        final_cash = report.final_cash,
        final_equity = report.final_equity,
        "Backtest complete"
    );
    Ok(report)
}
