pub mod bank;
pub mod config;
pub mod decision;
pub mod indicators;

pub use bank::{IndicatorBank, IndicatorSnapshot, Readings, SignalSource};
pub use config::{IndicatorParams, StrategyFileConfig};
pub use decision::DecisionEngine;
