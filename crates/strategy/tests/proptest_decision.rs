use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{Action, PriceBar};
use proptest::prelude::*;
use risk::RiskConfig;
use strategy::{DecisionEngine, IndicatorBank, IndicatorParams, SignalSource};

fn bars(closes: &[f64]) -> Vec<PriceBar> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| PriceBar {
            timestamp: base + Duration::hours(i as i64),
            open: c,
            high: c * 1.005,
            low: c * 0.995,
            close: c,
            volume: 1.0,
        })
        .collect()
}

fn small_params() -> IndicatorParams {
    IndicatorParams {
        tsi_long: 5,
        tsi_short: 3,
        macd_fast: 3,
        macd_slow: 6,
        macd_signal: 3,
        atr_period: 4,
        window: 50,
    }
}

/// Random walk of multiplicative steps starting at 100.
fn price_path(steps: Vec<f64>) -> Vec<f64> {
    steps
        .into_iter()
        .scan(100.0, |p, r| {
            *p *= 1.0 + r;
            Some(*p)
        })
        .collect()
}

proptest! {
    /// Nothing trades while the indicators are still warming up.
    #[test]
    fn no_intents_before_warmup(steps in prop::collection::vec(-0.05f64..0.05, 1..38)) {
        let params = IndicatorParams::default();
        let mut engine = DecisionEngine::new("BTC", &params, Arc::new(RiskConfig::default()));
        prop_assert_eq!(IndicatorBank::new(&params).warmup_len(), 38);
        for bar in bars(&price_path(steps)) {
            prop_assert!(engine.next(&bar, 1_000.0).is_none());
            prop_assert!(!engine.snapshot().valid);
        }
    }

    /// Intents alternate BUY/SELL, each SELL closes exactly the preceding BUY
    /// with P&L = (exit - entry) * size, and the stop never moves down while
    /// a position is held.
    #[test]
    fn lifecycle_is_consistent(steps in prop::collection::vec(-0.04f64..0.04, 10..200)) {
        let mut engine = DecisionEngine::new("BTC", &small_params(), Arc::new(RiskConfig::default()));
        let mut open: Option<(f64, f64)> = None;
        let mut last_stop: Option<f64> = None;

        for bar in bars(&price_path(steps)) {
            let intent = engine.next(&bar, 1_000.0);
            match (intent, open) {
                (Some(i), None) => {
                    prop_assert_eq!(i.action, Action::Buy);
                    prop_assert!(i.quantity > 0.0);
                    prop_assert_eq!(i.price, bar.close);
                    open = Some((i.price, i.quantity));
                    last_stop = engine.position().stop_loss_price;
                }
                (Some(i), Some((entry, size))) => {
                    prop_assert_eq!(i.action, Action::Sell);
                    prop_assert_eq!(i.quantity, size);
                    let pnl = i.realized_pnl.unwrap();
                    prop_assert!((pnl - (bar.close - entry) * size).abs() < 1e-9);
                    prop_assert!(!engine.position().is_long());
                    open = None;
                    last_stop = None;
                }
                (None, Some(_)) => {
                    let stop = engine.position().stop_loss_price.unwrap();
                    prop_assert!(stop >= last_stop.unwrap(), "stop moved down");
                    last_stop = Some(stop);
                }
                (None, None) => prop_assert!(!engine.position().is_long()),
            }
        }
    }
}
