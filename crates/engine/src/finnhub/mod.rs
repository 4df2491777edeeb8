pub mod rest;
pub mod stream;

pub use rest::FinnhubClient;
pub use stream::{FinnhubStream, LatestQuotes};
