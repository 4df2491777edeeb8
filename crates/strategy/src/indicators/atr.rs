//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing (alpha = 1/period), seeded with the mean of the
//! first `period` true ranges. The caller supplies the previous close; a bar
//! without one only primes the indicator.

use common::PriceBar;

use super::Ema;

#[derive(Debug, Clone)]
pub struct Atr {
    smoother: Ema,
}

/// True range of `bar` given the previous close.
pub fn true_range(bar: &PriceBar, prev_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            smoother: Ema::wilder(period),
        }
    }

    pub fn warmup_len(&self) -> usize {
        self.smoother.period() + 1
    }

    pub fn update(&mut self, bar: &PriceBar, prev_close: Option<f64>) -> Option<f64> {
        self.smoother.update(true_range(bar, prev_close?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_ohlc_bars(data: &[(f64, f64, f64, f64)]) -> Vec<PriceBar> {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        data.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| PriceBar {
                timestamp: base + Duration::days(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn true_range_gap_up() {
        let bars = make_ohlc_bars(&[(110.0, 115.0, 108.0, 112.0)]);
        // max(7, |115-100|, |108-100|) = 15
        assert_eq!(true_range(&bars[0], 100.0), 15.0);
    }

    #[test]
    fn atr_period_3() {
        let bars = make_ohlc_bars(&[
            (100.0, 105.0, 95.0, 102.0),  // primes prev close
            (102.0, 108.0, 100.0, 106.0), // TR = 8
            (106.0, 107.0, 98.0, 99.0),   // TR = 9
            (99.0, 103.0, 97.0, 101.0),   // TR = 6
            (101.0, 106.0, 100.0, 105.0), // TR = 6
        ]);
        let mut atr = Atr::new(3);
        let mut prev = None;
        let out: Vec<Option<f64>> = bars
            .iter()
            .map(|b| atr.update(b, prev.replace(b.close)))
            .collect();

        assert!(out[..3].iter().all(Option::is_none));
        // Seed: mean(8, 9, 6) = 23/3; then (1/3)*6 + (2/3)*(23/3) = 64/9
        assert!((out[3].unwrap() - 23.0 / 3.0).abs() < 1e-9);
        assert!((out[4].unwrap() - 64.0 / 9.0).abs() < 1e-9);
        assert_eq!(atr.warmup_len(), 4);
    }

    #[test]
    fn flat_quotes_measure_close_to_close_moves() {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut atr = Atr::new(2);
        atr.update(&PriceBar::flat(base, 100.0, 0.0), None);
        atr.update(&PriceBar::flat(base, 102.0, 0.0), Some(100.0));
        let v = atr.update(&PriceBar::flat(base, 99.0, 0.0), Some(102.0)).unwrap();
        assert!((v - 2.5).abs() < 1e-12, "got {v}");
    }
}
