use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Action, Broker, Error, Fill, Result, TradeIntent};

/// Quantity held in one symbol and its average fill price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperHolding {
    pub quantity: f64,
    pub avg_price: f64,
}

/// Simulated cash account.
///
/// Fills happen at the intent price adjusted by slippage; a fee fraction is
/// charged on every fill's notional. No real orders are ever sent.
pub struct PaperBroker {
    cash: Arc<RwLock<f64>>,
    holdings: Arc<RwLock<HashMap<String, PaperHolding>>>,
    fee_fraction: f64,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperBroker {
    pub fn new(initial_cash: f64, fee_fraction: f64, slippage_bps: f64) -> Self {
        info!(
            cash = initial_cash,
            fee_fraction = fee_fraction,
            slippage_bps = slippage_bps,
            "PaperBroker initialized"
        );
        Self {
            cash: Arc::new(RwLock::new(initial_cash)),
            holdings: Arc::new(RwLock::new(HashMap::new())),
            fee_fraction,
            slippage_bps,
        }
    }

    pub async fn cash(&self) -> f64 {
        *self.cash.read().await
    }

    pub async fn holding(&self, symbol: &str) -> Option<PaperHolding> {
        self.holdings.read().await.get(symbol).copied()
    }

    /// Cash plus every holding marked at `marks`. Holdings without a mark are
    /// valued at their average fill price.
    pub async fn equity(&self, marks: &HashMap<String, f64>) -> f64 {
        let cash = *self.cash.read().await;
        let holdings = self.holdings.read().await;
        cash + holdings
            .iter()
            .map(|(symbol, h)| h.quantity * marks.get(symbol).copied().unwrap_or(h.avg_price))
            .sum::<f64>()
    }

    fn fill_price(&self, action: Action, price: f64) -> f64 {
        // Buys pay more, sells receive less
        match action {
            Action::Buy => price * (1.0 + self.slippage_bps / 10_000.0),
            Action::Sell => price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    /// Cash net of the slippage and fee a BUY would add, so any quantity sized
    /// from it fills.
    async fn available_cash(&self) -> f64 {
        let headroom = (1.0 + self.slippage_bps / 10_000.0) * (1.0 + self.fee_fraction);
        self.cash().await / headroom
    }

    async fn execute(&self, intent: &TradeIntent) -> Result<Fill> {
        if !(intent.quantity > 0.0 && intent.price > 0.0) {
            return Err(Error::Broker(format!(
                "Cannot fill {} {} x {} at {}",
                intent.action, intent.symbol, intent.quantity, intent.price
            )));
        }

        let fill_price = self.fill_price(intent.action, intent.price);
        let notional = fill_price * intent.quantity;
        let fee = notional * self.fee_fraction;

        // Lock order: cash, then holdings.
        let mut cash = self.cash.write().await;
        let mut holdings = self.holdings.write().await;

        match intent.action {
            Action::Buy => {
                let cost = notional + fee;
                if cost > *cash + 1e-9 {
                    return Err(Error::Broker(format!(
                        "Insufficient cash for {}: need {cost:.4}, have {:.4}",
                        intent.symbol, *cash
                    )));
                }
                *cash = (*cash - cost).max(0.0);
                let h = holdings.entry(intent.symbol.clone()).or_insert(PaperHolding {
                    quantity: 0.0,
                    avg_price: 0.0,
                });
                let total = h.quantity + intent.quantity;
                h.avg_price = (h.avg_price * h.quantity + fill_price * intent.quantity) / total;
                h.quantity = total;
            }
            Action::Sell => {
                let held = holdings.get(&intent.symbol).map_or(0.0, |h| h.quantity);
                if held + 1e-9 < intent.quantity {
                    return Err(Error::Broker(format!(
                        "Cannot sell {} {}: only {held} held",
                        intent.quantity, intent.symbol
                    )));
                }
                *cash += notional - fee;
                let remaining = held - intent.quantity;
                if remaining <= 1e-9 {
                    holdings.remove(&intent.symbol);
                } else if let Some(h) = holdings.get_mut(&intent.symbol) {
                    h.quantity = remaining;
                }
            }
        }

        debug!(
            symbol = %intent.symbol,
            action = %intent.action,
            price = intent.price,
            fill = fill_price,
            qty = intent.quantity,
            fee = fee,
            cash = *cash,
            "Paper fill simulated"
        );

        Ok(Fill {
            intent_id: intent.id.clone(),
            symbol: intent.symbol.clone(),
            action: intent.action,
            fill_price,
            quantity: intent.quantity,
            fee,
            timestamp: Utc::now(),
        })
    }
}
