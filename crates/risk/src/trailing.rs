use crate::config::{FeeMode, RiskConfig, StopBand};

/// Volatility-adaptive trailing stop for long positions.
///
/// The stop percentage is a step function of `atr / close` over the
/// configured bands. Stops only ever move up.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStopPolicy {
    bands: Vec<StopBand>,
    /// Subtracted from every band's stop percentage (fee-in-stop mode).
    fee_adjustment: f64,
}

impl TrailingStopPolicy {
    pub fn new(bands: Vec<StopBand>) -> Self {
        Self {
            bands,
            fee_adjustment: 0.0,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        let fee_adjustment = match config.fee_mode {
            FeeMode::Size => 0.0,
            FeeMode::Stop => config.trading_fee_fraction,
        };
        Self {
            bands: config.trailing_stop_bands.clone(),
            fee_adjustment,
        }
    }

    /// Stop distance as a fraction of price for the given volatility.
    ///
    /// Non-finite `atr_pct` falls into the widest (last) band.
    pub fn stop_pct(&self, atr_pct: f64) -> f64 {
        let band = self
            .bands
            .iter()
            .find(|b| match b.max_atr_pct {
                Some(max) => atr_pct.is_finite() && atr_pct < max,
                None => true,
            })
            .or_else(|| self.bands.last());

        let pct = band.map(|b| b.stop_pct).unwrap_or(0.0);
        (pct - self.fee_adjustment).max(0.0)
    }

    pub fn initial_stop(&self, entry_price: f64, atr_pct: f64) -> f64 {
        entry_price * (1.0 - self.stop_pct(atr_pct))
    }

    /// `max(current_stop, current_price * (1 - stop_pct))`.
    pub fn ratchet(&self, current_stop: f64, current_price: f64, atr_pct: f64) -> f64 {
        let candidate = current_price * (1.0 - self.stop_pct(atr_pct));
        if candidate.is_finite() {
            current_stop.max(candidate)
        } else {
            current_stop
        }
    }
}

impl Default for TrailingStopPolicy {
    fn default() -> Self {
        Self::from_config(&RiskConfig::default())
    }
}
