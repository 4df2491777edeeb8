pub mod atr;
pub mod ema;
pub mod macd;
pub mod tsi;

pub use atr::Atr;
pub use ema::Ema;
pub use macd::{Macd, MacdValue};
pub use tsi::Tsi;
