pub mod collaborator;
pub mod config;
pub mod error;
pub mod types;

pub use collaborator::{BarSource, Broker, Ledger, QuoteSource};
pub use config::{Config, LedgerBackend, LiveFeed};
pub use error::{Error, Result};
pub use types::*;
