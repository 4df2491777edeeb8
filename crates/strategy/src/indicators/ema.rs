/// Incremental exponential moving average.
///
/// Seeded with the simple mean of the first `period` inputs, then smoothed
/// with `value = alpha * x + (1 - alpha) * value`. `alpha` is `2 / (period + 1)`
/// for a standard EMA and `1 / period` for Wilder smoothing.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self::with_alpha(period, 2.0 / (period as f64 + 1.0))
    }

    /// Wilder's moving average (used by ATR).
    pub fn wilder(period: usize) -> Self {
        assert!(period >= 1, "Wilder period must be >= 1");
        Self::with_alpha(period, 1.0 / period as f64)
    }

    fn with_alpha(period: usize, alpha: f64) -> Self {
        Self {
            period,
            alpha,
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    /// Feed one observation. Returns the average once `period` inputs have
    /// been seen.
    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.seen += 1;
        match self.value {
            Some(prev) => {
                let next = self.alpha * x + (1.0 - self.alpha) * prev;
                self.value = Some(next);
            }
            None => {
                self.seed_sum += x;
                if self.seen == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_until_period_inputs() {
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(1.0), None);
        assert_eq!(ema.update(2.0), None);
        assert_eq!(ema.update(3.0), Some(2.0));
    }

    #[test]
    fn smooths_after_seed() {
        let mut ema = Ema::new(3); // alpha = 0.5
        for x in [1.0, 2.0, 3.0] {
            ema.update(x);
        }
        assert_eq!(ema.update(6.0), Some(4.0));
    }

    #[test]
    fn wilder_uses_one_over_period() {
        // Same numbers as a 3-period ATR seeded on [8, 9, 6] then fed 6.
        let mut w = Ema::wilder(3);
        w.update(8.0);
        w.update(9.0);
        let seed = w.update(6.0).unwrap();
        assert!((seed - 23.0 / 3.0).abs() < 1e-12);
        let next = w.update(6.0).unwrap();
        assert!((next - 64.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn period_one_tracks_input() {
        let mut ema = Ema::new(1);
        assert_eq!(ema.update(5.0), Some(5.0));
        assert_eq!(ema.update(7.0), Some(7.0));
    }
}
