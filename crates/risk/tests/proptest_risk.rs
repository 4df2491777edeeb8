use proptest::prelude::*;
use risk::{RiskConfig, RiskSizer, TrailingStopPolicy};

proptest! {
    /// A long position's stop never decreases, whatever the price and
    /// volatility path.
    #[test]
    fn ratcheted_stop_is_non_decreasing(
        entry_price in 0.0001f64..1_000_000.0f64,
        entry_atr_pct in 0.0f64..0.2f64,
        path in prop::collection::vec((0.0001f64..1_000_000.0f64, 0.0f64..0.2f64), 1..64),
    ) {
        let policy = TrailingStopPolicy::from_config(&RiskConfig::default());
        let mut stop = policy.initial_stop(entry_price, entry_atr_pct);
        for (price, atr_pct) in path {
            let next = policy.ratchet(stop, price, atr_pct);
            prop_assert!(next >= stop, "stop moved down: {} -> {}", stop, next);
            stop = next;
        }
    }

    /// No cash means no position, for any valid price.
    #[test]
    fn size_is_zero_without_cash(
        cash in -1_000_000.0f64..=0.0f64,
        price in 0.0001f64..1_000_000.0f64,
        risk_fraction in 0.0001f64..=1.0f64,
        fee in 0.0f64..0.1f64,
    ) {
        let sizer = RiskSizer::new(fee);
        prop_assert_eq!(sizer.size(cash, price, risk_fraction), 0.0);
    }

    /// With cash available the notional never exceeds the risked share.
    #[test]
    fn notional_bounded_by_risked_cash(
        cash in 0.01f64..1_000_000.0f64,
        price in 0.0001f64..1_000_000.0f64,
        risk_fraction in 0.0001f64..=1.0f64,
        fee in 0.0f64..0.1f64,
    ) {
        let sizer = RiskSizer::new(fee);
        let qty = sizer.size(cash, price, risk_fraction);
        prop_assert!(qty >= 0.0);
        prop_assert!(qty * price <= cash * risk_fraction * (1.0 + 1e-9));
    }
}
