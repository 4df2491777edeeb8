use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use common::{Error, Quote, QuoteSource, Result};

const WS_URL: &str = "wss://ws.finnhub.io";

/// Latest trade per symbol as pushed by the stream.
///
/// Implements `QuoteSource` so the polling controller can sample it on its
/// own cadence. Quotes older than `max_age` count as unavailable.
#[derive(Clone)]
pub struct LatestQuotes {
    inner: Arc<RwLock<HashMap<String, (Quote, Instant)>>>,
    max_age: Duration,
}

impl LatestQuotes {
    pub fn new(max_age: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_age,
        }
    }

    /// Store `quote` unless a newer trade for the symbol is already cached.
    pub async fn update(&self, quote: Quote) {
        let mut map = self.inner.write().await;
        match map.get(&quote.symbol) {
            Some((existing, _)) if existing.timestamp > quote.timestamp => {}
            _ => {
                map.insert(quote.symbol.clone(), (quote, Instant::now()));
            }
        }
    }
}

#[async_trait]
impl QuoteSource for LatestQuotes {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let map = self.inner.read().await;
        let (quote, received) = map
            .get(symbol)
            .ok_or_else(|| Error::DataUnavailable(format!("No trade received yet for {symbol}")))?;
        let age = received.elapsed();
        if age > self.max_age {
            return Err(Error::DataUnavailable(format!(
                "Last trade for {symbol} is stale ({}s old)",
                age.as_secs()
            )));
        }
        Ok(quote.clone())
    }
}

/// Finnhub trade WebSocket for a set of symbols.
///
/// Subscribes every symbol on connect, answers pings and writes each trade
/// into a `LatestQuotes` cache. Reconnects with capped exponential backoff.
pub struct FinnhubStream {
    api_key: String,
    symbols: Vec<String>,
    quotes: LatestQuotes,
}

impl FinnhubStream {
    pub fn new(api_key: impl Into<String>, symbols: Vec<String>, quotes: LatestQuotes) -> Self {
        Self {
            api_key: api_key.into(),
            symbols,
            quotes,
        }
    }

    /// Run until `shutdown` flips to `true`, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            if *shutdown.borrow() {
                break;
            }
            info!(symbols = ?self.symbols, "Connecting to Finnhub WebSocket stream");
            let delay = tokio::select! {
                res = self.connect_once() => match res {
                    Ok(()) => {
                        info!("WebSocket stream closed cleanly");
                        backoff = Duration::from_secs(1);
                        backoff
                    }
                    Err(e) => {
                        warn!(error = %e, backoff = ?backoff, "WebSocket error, reconnecting");
                        let d = backoff;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        d
                    }
                },
                _ = shutdown.changed() => break,
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Finnhub stream stopped");
    }

    async fn connect_once(&self) -> Result<()> {
        let mut url = Url::parse(WS_URL).map_err(|e| Error::WebSocket(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", &self.api_key);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        for symbol in &self.symbols {
            let sub = serde_json::json!({ "type": "subscribe", "symbol": symbol }).to_string();
            write
                .send(Message::Text(sub))
                .await
                .map_err(|e| Error::WebSocket(e.to_string()))?;
        }

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let Message::Text(text) = msg {
                match parse_message(&text) {
                    Ok(StreamMessage::Trades(trades)) => {
                        for quote in trades {
                            self.quotes.update(quote).await;
                        }
                    }
                    Ok(StreamMessage::Ping) => {
                        write
                            .send(Message::Text(r#"{"type":"pong"}"#.to_string()))
                            .await
                            .map_err(|e| Error::WebSocket(e.to_string()))?;
                    }
                    Ok(StreamMessage::Other) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to parse Finnhub message");
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── Finnhub message parsing ─────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum StreamMessage {
    Trades(Vec<Quote>),
    Ping,
    Other,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Vec<TradeData>,
}

#[derive(Deserialize)]
struct TradeData {
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    time_ms: i64,
    #[serde(rename = "v", default)]
    volume: f64,
}

fn parse_message(text: &str) -> Result<StreamMessage> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.kind.as_str() {
        "trade" => {
            let trades = envelope
                .data
                .into_iter()
                .filter(|t| t.price.is_finite() && t.price > 0.0)
                .map(|t| {
                    let timestamp: DateTime<Utc> = Utc
                        .timestamp_millis_opt(t.time_ms)
                        .single()
                        .unwrap_or_else(Utc::now);
                    Quote {
                        timestamp,
                        symbol: t.symbol,
                        price: t.price,
                        volume: t.volume,
                    }
                })
                .collect();
            Ok(StreamMessage::Trades(trades))
        }
        "ping" => Ok(StreamMessage::Ping),
        other => {
            debug!(kind = %other, "Ignoring Finnhub message");
            Ok(StreamMessage::Other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_batch() {
        let text = r#"{"data":[
            {"c":null,"p":42000.5,"s":"BINANCE:BTCUSDT","t":1704067200000,"v":0.01},
            {"c":null,"p":2300.1,"s":"BINANCE:ETHUSDT","t":1704067200500,"v":1.5}
        ],"type":"trade"}"#;
        let StreamMessage::Trades(trades) = parse_message(text).unwrap() else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].symbol, "BINANCE:BTCUSDT");
        assert_eq!(trades[0].price, 42000.5);
        assert_eq!(trades[1].timestamp.timestamp_millis(), 1_704_067_200_500);
    }

    #[test]
    fn recognises_ping() {
        assert_eq!(parse_message(r#"{"type":"ping"}"#).unwrap(), StreamMessage::Ping);
    }

    #[test]
    fn unknown_message_is_ignored() {
        assert_eq!(
            parse_message(r#"{"type":"error","msg":"Invalid symbol"}"#).unwrap(),
            StreamMessage::Other
        );
    }

    fn quote(symbol: &str, price: f64, ts_ms: i64) -> Quote {
        Quote {
            timestamp: Utc.timestamp_millis_opt(ts_ms).unwrap(),
            symbol: symbol.into(),
            price,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn cache_keeps_newest_trade() {
        let cache = LatestQuotes::new(Duration::from_secs(30));
        cache.update(quote("A", 10.0, 2_000)).await;
        cache.update(quote("A", 9.0, 1_000)).await;
        assert_eq!(cache.quote("A").await.unwrap().price, 10.0);

        cache.update(quote("A", 11.0, 3_000)).await;
        assert_eq!(cache.quote("A").await.unwrap().price, 11.0);
    }

    #[tokio::test]
    async fn missing_symbol_is_unavailable() {
        let cache = LatestQuotes::new(Duration::from_secs(30));
        assert!(matches!(cache.quote("A").await, Err(Error::DataUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_quote_is_unavailable() {
        let cache = LatestQuotes::new(Duration::from_secs(30));
        cache.update(quote("A", 10.0, 1_000)).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(cache.quote("A").await, Err(Error::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn spawned_stream_joins_after_shutdown() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let quotes = LatestQuotes::new(Duration::from_secs(60));
        let stream = FinnhubStream::new("key", vec!["BINANCE:BTCUSDT".into()], quotes);
        let task = tokio::spawn(stream.run(rx));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stream task should stop once shutdown is signaled")
            .unwrap();
    }
}
