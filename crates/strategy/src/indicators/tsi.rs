use super::Ema;

/// True Strength Index, scaled to [-100, 100].
///
/// `TSI = 100 * EMA_s(EMA_r(m)) / EMA_s(EMA_r(|m|))`, `m = close[t] - close[t-1]`.
/// Defined from bar `long + short` onwards. A perfectly flat series reads 0.
#[derive(Debug, Clone)]
pub struct Tsi {
    prev_close: Option<f64>,
    long: Ema,
    short: Ema,
    abs_long: Ema,
    abs_short: Ema,
}

impl Tsi {
    pub fn new(long: usize, short: usize) -> Self {
        Self {
            prev_close: None,
            long: Ema::new(long),
            short: Ema::new(short),
            abs_long: Ema::new(long),
            abs_short: Ema::new(short),
        }
    }

    /// Number of closes needed before the first value.
    pub fn warmup_len(&self) -> usize {
        self.long.period() + self.short.period()
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close)?;
        let momentum = close - prev;

        let smoothed = self.long.update(momentum);
        let abs_smoothed = self.abs_long.update(momentum.abs());
        let (Some(m), Some(a)) = (smoothed, abs_smoothed) else {
            return None;
        };

        // Both short EMAs must see every long-smoothed value to stay aligned.
        let num = self.short.update(m);
        let den = self.abs_short.update(a);
        let (Some(num), Some(den)) = (num, den) else {
            return None;
        };
        if den == 0.0 {
            return Some(0.0);
        }
        Some(100.0 * num / den)
    }
}
