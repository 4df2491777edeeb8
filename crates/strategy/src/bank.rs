use std::collections::VecDeque;

use common::PriceBar;

use crate::config::IndicatorParams;
use crate::indicators::{Atr, Macd, Tsi};

/// Indicator values as of the latest bar.
///
/// Individual fields become `Some` as their own warm-up completes, but only a
/// `valid` snapshot may drive entry/exit decisions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndicatorSnapshot {
    pub valid: bool,
    /// True Strength Index in [-100, 100].
    pub tsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub atr: Option<f64>,
    /// ATR as of the previous bar.
    pub prev_atr: Option<f64>,
}

/// The values of a valid snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub tsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub atr: f64,
    pub prev_atr: f64,
}

impl IndicatorSnapshot {
    pub fn invalid() -> Self {
        Self::default()
    }

    /// `None` unless the snapshot is valid.
    pub fn readings(&self) -> Option<Readings> {
        if !self.valid {
            return None;
        }
        Some(Readings {
            tsi: self.tsi?,
            macd_line: self.macd_line?,
            macd_signal: self.macd_signal?,
            atr: self.atr?,
            prev_atr: self.prev_atr?,
        })
    }
}

/// Anything that turns bars into indicator snapshots.
///
/// `IndicatorBank` is the production implementation; tests can script
/// snapshots directly.
pub trait SignalSource: Send {
    fn update(&mut self, bar: &PriceBar) -> IndicatorSnapshot;

    /// Bars required before the first valid snapshot.
    fn warmup_len(&self) -> usize;
}

/// Incrementally maintained TSI, MACD and ATR over a bounded bar window.
///
/// The window supplies the previous close for the true range; TSI and MACD
/// carry their own smoothing state.
#[derive(Debug, Clone)]
pub struct IndicatorBank {
    tsi: Tsi,
    macd: Macd,
    atr: Atr,
    prev_atr: Option<f64>,
    window: VecDeque<PriceBar>,
    capacity: usize,
    bars_seen: usize,
    warmup: usize,
}

impl IndicatorBank {
    pub fn new(params: &IndicatorParams) -> Self {
        let tsi = Tsi::new(params.tsi_long, params.tsi_short);
        let macd = Macd::new(params.macd_fast, params.macd_slow, params.macd_signal);
        let atr = Atr::new(params.atr_period);
        // +1: the entry filter compares against the previous bar's ATR.
        let warmup = tsi
            .warmup_len()
            .max(macd.warmup_len())
            .max(atr.warmup_len() + 1);
        let capacity = params.window.max(1);

        Self {
            tsi,
            macd,
            atr,
            prev_atr: None,
            window: VecDeque::with_capacity(capacity),
            capacity,
            bars_seen: 0,
            warmup,
        }
    }

}

impl SignalSource for IndicatorBank {
    fn update(&mut self, bar: &PriceBar) -> IndicatorSnapshot {
        let prev_close = self.window.back().map(|b| b.close);
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(bar.clone());
        self.bars_seen += 1;

        let tsi = self.tsi.update(bar.close);
        let macd = self.macd.update(bar.close);
        let atr = self.atr.update(bar, prev_close);
        let prev_atr = std::mem::replace(&mut self.prev_atr, atr);

        let snapshot = IndicatorSnapshot {
            valid: false,
            tsi,
            macd_line: macd.map(|m| m.line),
            macd_signal: macd.map(|m| m.signal),
            atr,
            prev_atr,
        };
        let complete = snapshot.tsi.is_some()
            && snapshot.macd_line.is_some()
            && snapshot.atr.is_some()
            && snapshot.prev_atr.is_some();

        IndicatorSnapshot {
            valid: complete && self.bars_seen >= self.warmup,
            ..snapshot
        }
    }

    fn warmup_len(&self) -> usize {
        self.warmup
    }
}
