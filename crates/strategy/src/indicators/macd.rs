use super::Ema;

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period).
/// Updated one close at a time; defined from bar `slow + signal - 1` onwards.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

/// MACD line and its signal line as of the latest close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    pub fn warmup_len(&self) -> usize {
        self.slow.period() + self.signal.period() - 1
    }

    pub fn update(&mut self, close: f64) -> Option<MacdValue> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close)?;
        let line = fast? - slow;
        let signal = self.signal.update(line)?;
        Some(MacdValue { line, signal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn macd_undefined_with_insufficient_data() {
        let mut macd = Macd::new(12, 26, 9);
        let out: Vec<_> = (0..33).map(|_| macd.update(100.0)).collect();
        assert!(out.iter().all(Option::is_none));
        assert!(macd.update(100.0).is_some(), "34th close should define MACD");
        assert_eq!(macd.warmup_len(), 34);
    }

    #[test]
    fn flat_prices_give_zero_lines() {
        let mut macd = Macd::new(3, 6, 3);
        let mut last = None;
        for _ in 0..20 {
            last = macd.update(42.0);
        }
        let v = last.unwrap();
        assert!(v.line.abs() < 1e-12 && v.signal.abs() < 1e-12);
    }

    #[test]
    fn uptrend_is_bullish() {
        let mut macd = Macd::new(3, 6, 3);
        let mut last = None;
        for c in trending_up(40) {
            last = macd.update(c);
        }
        let v = last.unwrap();
        assert!(v.line > 0.0, "fast EMA should lead in an uptrend");
    }

    #[test]
    fn sharp_reversal_drops_line_below_signal() {
        let mut macd = Macd::new(3, 6, 3);
        let mut prices = trending_up(30);
        prices.extend((0..6).map(|i| 110.0 - i as f64 * 4.0));
        let mut last = None;
        for c in prices {
            last = macd.update(c);
        }
        let v = last.unwrap();
        assert!(v.line < v.signal, "{v:?}");
    }
}
