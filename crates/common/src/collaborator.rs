use async_trait::async_trait;

use crate::{Fill, PriceBar, Quote, Result, TradeIntent};

/// On-demand latest quote for a symbol (live mode).
///
/// Implementations must not block indefinitely: transport failures and
/// timeouts surface as `Error::DataUnavailable`.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;
}

/// Finite, timestamp-ordered bar history for a symbol (historical mode).
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn bars(&self, symbol: &str) -> Result<Vec<PriceBar>>;
}

/// Append-only trade log.
///
/// A failed `record` is logged by the caller and never rolls back the
/// decision that produced the intent.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record(&self, intent: &TradeIntent) -> Result<()>;
}

/// Cash account that executes trade intents one-to-one.
///
/// `PaperBroker` implements this for both the historical simulator and
/// live paper trading. No real orders are ever sent.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Cash currently available for sizing new positions.
    async fn available_cash(&self) -> f64;

    /// Execute an intent and return the fill confirmation.
    async fn execute(&self, intent: &TradeIntent) -> Result<Fill>;
}
