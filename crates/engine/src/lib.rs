pub mod backtest;
pub mod csv_bars;
pub mod finnhub;
pub mod ledger;
pub mod polling;

pub use backtest::{run_backtest, BacktestReport, SymbolSummary};
pub use csv_bars::CsvBarSource;
pub use finnhub::{FinnhubClient, FinnhubStream, LatestQuotes};
pub use ledger::{CsvLedger, SqliteLedger};
pub use polling::{CycleOutcome, PollingController, PollingSettings, RetryPolicy, SymbolWorker};
