use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Bars for a symbol are fed to the decision engine in
/// timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// A degenerate bar where every price field equals `price`.
    pub fn flat(timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Latest trade price for a symbol from the live feed. No OHLC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
}

impl Quote {
    /// Bar-equivalent of this quote, used to drive the indicators in live mode.
    pub fn to_bar(&self) -> PriceBar {
        PriceBar::flat(self.timestamp, self.price, self.volume)
    }
}

/// Direction of a trade intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// A decision emitted by the decision engine. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Unique per decision; ledgers may use it to deduplicate.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: Action,
    pub price: f64,
    pub quantity: f64,
    /// Only present on SELL intents.
    pub realized_pnl: Option<f64>,
}

impl TradeIntent {
    pub fn buy(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: f64, quantity: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            symbol: symbol.into(),
            action: Action::Buy,
            price,
            quantity,
            realized_pnl: None,
        }
    }

    pub fn sell(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        price: f64,
        quantity: f64,
        realized_pnl: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            symbol: symbol.into(),
            action: Action::Sell,
            price,
            quantity,
            realized_pnl: Some(realized_pnl),
        }
    }

    /// Cash amount spent (BUY) or received (SELL), before fees.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Confirmation of an executed intent returned by a broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub intent_id: String,
    pub symbol: String,
    pub action: Action,
    pub fill_price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

/// Whether the position for a symbol is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    #[default]
    Flat,
    Long,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Flat => write!(f, "FLAT"),
            PositionStatus::Long => write!(f, "LONG"),
        }
    }
}

/// Per-symbol position owned by exactly one decision engine.
///
/// `entry_price` and `stop_loss_price` are `Some` only while `Long`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionState {
    pub status: PositionStatus,
    pub entry_price: Option<f64>,
    pub size: f64,
    pub stop_loss_price: Option<f64>,
}

impl PositionState {
    pub fn is_long(&self) -> bool {
        self.status == PositionStatus::Long
    }
}

/// Historical simulation or live polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Historical,
    Live,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Historical => write!(f, "HISTORICAL"),
            Mode::Live => write!(f, "LIVE"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HISTORICAL" => Ok(Mode::Historical),
            "LIVE" => Ok(Mode::Live),
            other => Err(format!("MODE must be 'HISTORICAL' or 'LIVE', got: '{other}'")),
        }
    }
}
