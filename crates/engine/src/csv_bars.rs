use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use common::{BarSource, Error, PriceBar, Result};

/// Historical bars read from `<dir>/<symbol>.csv`.
///
/// Columns: `timestamp,open,high,low,close,volume`. Timestamps are RFC 3339
/// or unix seconds. Characters that are awkward in file names (`:` and `/`)
/// in the symbol become `_`, so `BINANCE:BTCUSDT` reads `BINANCE_BTCUSDT.csv`.
pub struct CsvBarSource {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct BarRecord {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl CsvBarSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        let name: String = symbol
            .chars()
            .map(|c| if c == ':' || c == '/' { '_' } else { c })
            .collect();
        self.dir.join(format!("{name}.csv"))
    }
}

#[async_trait]
impl BarSource for CsvBarSource {
    async fn bars(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let path = self.path_for(symbol);
        tokio::task::spawn_blocking(move || load_bars(&path))
            .await
            .map_err(|e| Error::Other(format!("bar loader task failed: {e}")))?
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn load_bars(path: &Path) -> Result<Vec<PriceBar>> {
    let file = File::open(path).map_err(|e| {
        Error::DataUnavailable(format!("failed to open bar CSV {}: {e}", path.display()))
    })?;
    let mut reader = csv::Reader::from_reader(file);

    let mut bars = Vec::new();
    for (line, result) in reader.deserialize::<BarRecord>().enumerate() {
        let record = result?;
        let Some(timestamp) = parse_timestamp(&record.timestamp) else {
            return Err(Error::DataUnavailable(format!(
                "{}: bad timestamp '{}' on row {}",
                path.display(),
                record.timestamp,
                line + 1
            )));
        };
        if !record.close.is_finite() || record.close <= 0.0 {
            warn!(path = %path.display(), row = line + 1, "Skipping bar with invalid close");
            continue;
        }
        bars.push(PriceBar {
            timestamp,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() != before {
        warn!(
            path = %path.display(),
            duplicates = before - bars.len(),
            "Dropped bars with duplicate timestamps"
        );
    }
    debug!(path = %path.display(), bars = bars.len(), "Loaded bar CSV");
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_sorted_bars_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let csv_data = "timestamp,open,high,low,close,volume\n\
2024-01-02T00:00:00Z,101,103,100,102,7\n\
2024-01-01T00:00:00Z,100,102,99,101,5\n\
1704240000,102,104,101,0,3\n\
2024-01-01T00:00:00Z,100,102,99,101,5\n";
        std::fs::write(dir.path().join("BINANCE_BTCUSDT.csv"), csv_data).unwrap();

        let source = CsvBarSource::new(dir.path());
        let bars = source.bars("BINANCE:BTCUSDT").await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
        assert_eq!(bars[1].close, 102.0);
    }

    #[tokio::test]
    async fn accepts_unix_seconds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ETH.csv"),
            "timestamp,open,high,low,close,volume\n1704067200,1,2,0.5,1.5,10\n",
        )
        .unwrap();
        let bars = CsvBarSource::new(dir.path()).bars("ETH").await.unwrap();
        assert_eq!(bars[0].timestamp.timestamp(), 1_704_067_200);
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvBarSource::new(dir.path()).bars("NOPE").await.unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));
    }
}
