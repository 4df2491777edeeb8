use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use common::{BarSource, Error, PriceBar, Quote, QuoteSource, Result};

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// REST client for Finnhub. Serves latest quotes in live mode and candle
/// history in historical mode.
pub struct FinnhubClient {
    api_key: String,
    http: Client,
    resolution: String,
    history_days: i64,
}

impl FinnhubClient {
    /// Every request is bounded by `timeout`.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            http,
            resolution: "D".to_string(),
            history_days: 365,
        })
    }

    /// Candle resolution (`1`, `5`, `15`, `30`, `60`, `D`, `W`, `M`) and the
    /// look-back used by `bars`.
    pub fn with_history(mut self, resolution: impl Into<String>, days: i64) -> Self {
        self.resolution = resolution.into();
        self.history_days = days;
        self
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let url = format!("{BASE_URL}{path}");
        let resp = self
            .http
            .get(&url)
            .query(params)
            .query(&[("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::DataUnavailable(format!("GET {path}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::DataUnavailable(format!("GET {path}: {e}")))?;

        if !status.is_success() {
            return Err(Error::DataUnavailable(format!("GET {path}: HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl QuoteSource for FinnhubClient {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        debug!(symbol = %symbol, "Fetching Finnhub quote");
        let body = self.get("/quote", &[("symbol", symbol.to_string())]).await?;
        parse_quote(symbol, &body)
    }
}

#[async_trait]
impl BarSource for FinnhubClient {
    async fn bars(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(self.history_days);
        debug!(
            symbol = %symbol,
            resolution = %self.resolution,
            days = self.history_days,
            "Fetching Finnhub candles"
        );
        let body = self
            .get(
                "/crypto/candle",
                &[
                    ("symbol", symbol.to_string()),
                    ("resolution", self.resolution.clone()),
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                ],
            )
            .await?;
        parse_candles(symbol, &body)
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct QuoteResponse {
    /// Current price.
    c: Option<f64>,
    /// Unix seconds of the last trade.
    #[serde(default)]
    t: Option<i64>,
}

#[derive(Deserialize)]
struct CandleResponse {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Finnhub answers unknown symbols with an all-zero quote rather than an error.
fn parse_quote(symbol: &str, body: &str) -> Result<Quote> {
    let resp: QuoteResponse = serde_json::from_str(body)
        .map_err(|e| Error::DataUnavailable(format!("Malformed quote for {symbol}: {e}")))?;

    let price = match resp.c {
        Some(p) if p.is_finite() && p > 0.0 => p,
        _ => return Err(Error::DataUnavailable(format!("No price for {symbol}"))),
    };
    let timestamp = match resp.t {
        Some(t) if t > 0 => unix_seconds(t).unwrap_or_else(Utc::now),
        _ => Utc::now(),
    };

    Ok(Quote {
        timestamp,
        symbol: symbol.to_string(),
        price,
        volume: 0.0,
    })
}

fn parse_candles(symbol: &str, body: &str) -> Result<Vec<PriceBar>> {
    let resp: CandleResponse = serde_json::from_str(body)
        .map_err(|e| Error::DataUnavailable(format!("Malformed candles for {symbol}: {e}")))?;

    if resp.s != "ok" {
        return Err(Error::DataUnavailable(format!(
            "No candles for {symbol} (status '{}')",
            resp.s
        )));
    }

    let n = resp.t.len();
    if [resp.o.len(), resp.h.len(), resp.l.len(), resp.c.len(), resp.v.len()]
        .iter()
        .any(|&len| len != n)
    {
        return Err(Error::DataUnavailable(format!(
            "Candle arrays for {symbol} have mismatched lengths"
        )));
    }

    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let timestamp = unix_seconds(resp.t[i]).ok_or_else(|| {
            Error::DataUnavailable(format!("Bad candle timestamp {} for {symbol}", resp.t[i]))
        })?;
        bars.push(PriceBar {
            timestamp,
            open: resp.o[i],
            high: resp.h[i],
            low: resp.l[i],
            close: resp.c[i],
            volume: resp.v[i],
        });
    }
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}
