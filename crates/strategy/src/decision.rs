use std::sync::Arc;

use tracing::{debug, info, warn};

use common::{PositionState, PositionStatus, PriceBar, TradeIntent};
use risk::{RiskConfig, RiskSizer, TrailingStopPolicy};

use crate::bank::{IndicatorBank, IndicatorSnapshot, SignalSource};
use crate::config::IndicatorParams;

/// Per-symbol FLAT/LONG state machine.
///
/// Each bar is processed in a fixed order: update indicators, ratchet the
/// stop if LONG, evaluate exit (LONG) or entry (FLAT), emit at most one
/// intent.
///
/// Entry requires all of: valid snapshot, TSI > 0, MACD above its signal,
/// ATR not falling. Exit requires any of: MACD below its signal, TSI < 0,
/// close below the trailing stop.
pub struct DecisionEngine<S = IndicatorBank> {
    symbol: String,
    signals: S,
    risk: Arc<RiskConfig>,
    sizer: RiskSizer,
    stops: TrailingStopPolicy,
    position: PositionState,
    /// ATR as a fraction of close, from the last bar that had one.
    last_atr_pct: Option<f64>,
    last_snapshot: IndicatorSnapshot,
    /// Id of the intent emitted on the latest bar and the position it replaced.
    undo: Option<(String, PositionState)>,
}

impl DecisionEngine<IndicatorBank> {
    pub fn new(symbol: impl Into<String>, params: &IndicatorParams, risk: Arc<RiskConfig>) -> Self {
        Self::with_source(symbol, IndicatorBank::new(params), risk)
    }
}

impl<S: SignalSource> DecisionEngine<S> {
    pub fn with_source(symbol: impl Into<String>, signals: S, risk: Arc<RiskConfig>) -> Self {
        Self {
            symbol: symbol.into(),
            signals,
            sizer: RiskSizer::from_config(&risk),
            stops: TrailingStopPolicy::from_config(&risk),
            risk,
            position: PositionState::default(),
            last_atr_pct: None,
            last_snapshot: IndicatorSnapshot::invalid(),
            undo: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn snapshot(&self) -> &IndicatorSnapshot {
        &self.last_snapshot
    }

    pub fn warmup_len(&self) -> usize {
        self.signals.warmup_len()
    }

    /// Process one bar. Returns the trade intent decided on this bar, if any.
    pub fn next(&mut self, bar: &PriceBar, available_cash: f64) -> Option<TradeIntent> {
        self.undo = None;
        if !(bar.close.is_finite() && bar.close > 0.0) {
            warn!(symbol = %self.symbol, close = bar.close, "Ignoring bar with unusable close");
            return None;
        }

        let snapshot = self.signals.update(bar);
        self.last_snapshot = snapshot;
        if let Some(atr) = snapshot.atr {
            self.last_atr_pct = Some(atr / bar.close);
        }

        match self.position.status {
            PositionStatus::Long => self.evaluate_exit(bar, &snapshot),
            PositionStatus::Flat => self.evaluate_entry(bar, &snapshot, available_cash),
        }
    }

    /// Restore the position held before `intent` was decided. Called when the
    /// broker refuses to fill the intent returned by the latest `next`.
    /// Returns `false` if `intent` is not that intent.
    pub fn reject(&mut self, intent: &TradeIntent) -> bool {
        match self.undo.take() {
            Some((id, prior)) if id == intent.id => {
                warn!(
                    symbol = %self.symbol,
                    action = %intent.action,
                    restored = %prior.status,
                    "Intent not filled, position restored"
                );
                self.position = prior;
                true
            }
            other => {
                self.undo = other;
                warn!(symbol = %self.symbol, id = %intent.id, "No pending decision matches rejected intent");
                false
            }
        }
    }

    fn evaluate_entry(
        &mut self,
        bar: &PriceBar,
        snapshot: &IndicatorSnapshot,
        available_cash: f64,
    ) -> Option<TradeIntent> {
        let r = snapshot.readings()?;
        let bullish = r.tsi > 0.0 && r.macd_line > r.macd_signal && r.atr >= r.prev_atr;
        if !bullish {
            return None;
        }

        let close = bar.close;
        let size = self.sizer.size(available_cash, close, self.risk.risk_fraction);
        if size <= 0.0 {
            debug!(symbol = %self.symbol, cash = available_cash, price = close, "Entry signal sized to zero, staying flat");
            return None;
        }

        let atr_pct = r.atr / close;
        let stop = self.stops.initial_stop(close, atr_pct);
        let intent = TradeIntent::buy(self.symbol.clone(), bar.timestamp, close, size);
        let prior = std::mem::replace(
            &mut self.position,
            PositionState {
                status: PositionStatus::Long,
                entry_price: Some(close),
                size,
                stop_loss_price: Some(stop),
            },
        );
        self.undo = Some((intent.id.clone(), prior));

        info!(
            symbol = %self.symbol,
            price = close,
            size = size,
            stop = stop,
            tsi = r.tsi,
            atr_pct = atr_pct,
            "Entry: BUY"
        );
        Some(intent)
    }

    fn evaluate_exit(&mut self, bar: &PriceBar, snapshot: &IndicatorSnapshot) -> Option<TradeIntent> {
        let close = bar.close;
        let entry_price = self.position.entry_price.unwrap_or(close);
        let current_stop = self.position.stop_loss_price.unwrap_or(0.0);

        let atr_pct = self.last_atr_pct.unwrap_or(f64::NAN);
        let stop = self.stops.ratchet(current_stop, close, atr_pct);
        self.position.stop_loss_price = Some(stop);

        let (macd_bearish, tsi_negative) = match snapshot.readings() {
            Some(r) => (r.macd_line < r.macd_signal, r.tsi < 0.0),
            None => (false, false),
        };
        let stop_hit = close < stop;
        if !(macd_bearish || tsi_negative || stop_hit) {
            return None;
        }

        let size = self.position.size;
        let realized_pnl = (close - entry_price) * size;
        let intent = TradeIntent::sell(self.symbol.clone(), bar.timestamp, close, size, realized_pnl);
        let prior = std::mem::take(&mut self.position);
        self.undo = Some((intent.id.clone(), prior));

        info!(
            symbol = %self.symbol,
            price = close,
            size = size,
            entry = entry_price,
            stop = stop,
            pnl = realized_pnl,
            macd_bearish,
            tsi_negative,
            stop_hit,
            "Exit: SELL"
        );
        Some(intent)
    }
}
