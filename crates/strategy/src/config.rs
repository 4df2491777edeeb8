use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, Result};
use risk::RiskConfig;

/// Top-level strategy config file (TOML).
///
/// Example `config/strategy.toml`:
/// ```toml
/// [indicators]
/// tsi_long = 25
/// tsi_short = 13
/// macd_fast = 12
/// macd_slow = 26
/// macd_signal = 9
/// atr_period = 14
///
/// [risk]
/// risk_fraction = 0.5
/// trading_fee_fraction = 0.001
/// fee_mode = "size"
///
/// [[risk.trailing_stop_bands]]
/// max_atr_pct = 0.01
/// stop_pct = 0.05
///
/// [[risk.trailing_stop_bands]]
/// max_atr_pct = 0.025
/// stop_pct = 0.10
///
/// [[risk.trailing_stop_bands]]
/// stop_pct = 0.20
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyFileConfig {
    pub indicators: IndicatorParams,
    pub risk: RiskConfig,
}

/// Indicator periods and the bar window length.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorParams {
    /// TSI long (first) smoothing period.
    pub tsi_long: usize,
    /// TSI short (second) smoothing period.
    pub tsi_short: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    /// Bars retained in the rolling window; oldest evicted first.
    pub window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            tsi_long: 25,
            tsi_short: 13,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            window: 200,
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("tsi_long", self.tsi_long),
            ("tsi_short", self.tsi_short),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("atr_period", self.atr_period),
            ("window", self.window),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(Error::Config(format!("indicators.{name} must be >= 1")));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(Error::Config(format!(
                "indicators.macd_fast ({}) must be less than macd_slow ({})",
                self.macd_fast, self.macd_slow
            )));
        }
        Ok(())
    }
}

impl StrategyFileConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read strategy config at '{}': {e}",
                path.display()
            ))
        })?;
        let cfg: Self = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse strategy config at '{}': {e}",
                path.display()
            ))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` when given; otherwise fall back to built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                info!("STRATEGY_CONFIG_PATH not set, using default strategy parameters");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.indicators.validate()?;
        self.risk.validate()
    }
}
