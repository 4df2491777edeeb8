pub mod config;
pub mod sizer;
pub mod trailing;

pub use config::{FeeMode, RiskConfig, StopBand};
pub use sizer::RiskSizer;
pub use trailing::TrailingStopPolicy;
