use crate::config::{FeeMode, RiskConfig};

/// Turns available cash into a position size.
///
/// `quantity = cash * risk_fraction / price * (1 - fee)`. A zero result is
/// the "do not trade" answer, never an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskSizer {
    /// Fee headroom withheld from the size. Zero when the fee is reflected in
    /// the stop instead.
    fee_fraction: f64,
}

impl RiskSizer {
    pub fn new(fee_fraction: f64) -> Self {
        Self { fee_fraction }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        match config.fee_mode {
            FeeMode::Size => Self::new(config.trading_fee_fraction),
            FeeMode::Stop => Self::new(0.0),
        }
    }

    pub fn size(&self, available_cash: f64, price: f64, risk_fraction: f64) -> f64 {
        if !(available_cash > 0.0 && price > 0.0 && risk_fraction > 0.0) {
            return 0.0;
        }
        if !available_cash.is_finite() || !price.is_finite() {
            return 0.0;
        }
        let quantity = available_cash * risk_fraction / price * (1.0 - self.fee_fraction);
        if quantity.is_finite() && quantity > 0.0 {
            quantity
        } else {
            0.0
        }
    }
}
