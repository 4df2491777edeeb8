use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// How the trading fee is accounted for at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeeMode {
    /// Shrink the position size by `(1 - fee)` to leave fee headroom.
    #[default]
    Size,
    /// Keep the full size and tighten the trailing stop by the fee instead.
    Stop,
}

/// One band of the volatility-adaptive trailing stop.
///
/// Applies while `atr / close < max_atr_pct`. The last band has no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopBand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_atr_pct: Option<f64>,
    pub stop_pct: f64,
}

/// User-configurable risk parameters. Loaded once at startup, read-only after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of available cash committed to a new position (e.g. 0.5 = 50%).
    pub risk_fraction: f64,
    /// Exchange fee as a fraction of notional (e.g. 0.001 = 10 bps).
    pub trading_fee_fraction: f64,
    pub fee_mode: FeeMode,
    /// Ordered by ascending `max_atr_pct`.
    pub trailing_stop_bands: Vec<StopBand>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.5,
            trading_fee_fraction: 0.0,
            fee_mode: FeeMode::Size,
            trailing_stop_bands: vec![
                StopBand { max_atr_pct: Some(0.01), stop_pct: 0.05 },
                StopBand { max_atr_pct: Some(0.025), stop_pct: 0.10 },
                StopBand { max_atr_pct: None, stop_pct: 0.20 },
            ],
        }
    }
}

impl RiskConfig {
    /// Reject values the sizer and stop policy cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "risk_fraction must be in (0, 1], got {}",
                self.risk_fraction
            )));
        }
        if !(self.trading_fee_fraction >= 0.0 && self.trading_fee_fraction < 1.0) {
            return Err(Error::Config(format!(
                "trading_fee_fraction must be in [0, 1), got {}",
                self.trading_fee_fraction
            )));
        }

        let bands = &self.trailing_stop_bands;
        let Some(last) = bands.last() else {
            return Err(Error::Config("trailing_stop_bands must not be empty".into()));
        };
        if last.max_atr_pct.is_some() {
            return Err(Error::Config(
                "the last trailing stop band must not set max_atr_pct".into(),
            ));
        }

        let mut prev_bound = 0.0;
        for (i, band) in bands.iter().enumerate() {
            if !(band.stop_pct > 0.0 && band.stop_pct < 1.0) {
                return Err(Error::Config(format!(
                    "trailing stop band {i}: stop_pct must be in (0, 1), got {}",
                    band.stop_pct
                )));
            }
            let is_last = i + 1 == bands.len();
            match (band.max_atr_pct, is_last) {
                (Some(bound), false) => {
                    if !bound.is_finite() || bound <= prev_bound {
                        return Err(Error::Config(format!(
                            "trailing stop band {i}: max_atr_pct must be ascending and positive, got {bound}"
                        )));
                    }
                    prev_bound = bound;
                }
                (None, false) => {
                    return Err(Error::Config(format!(
                        "trailing stop band {i}: only the last band may omit max_atr_pct"
                    )));
                }
                (_, true) => {}
            }
        }
        Ok(())
    }
}
