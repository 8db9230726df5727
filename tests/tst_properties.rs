//! Invariants of the scoring pipeline that must hold for any input.

use nse_orb_scanner::breakout::{Breakout, BreakoutDirection};
use nse_orb_scanner::imbalance::{ImbalanceDirection, StackedImbalance, classify_imbalance, imbalance_ratio};
use nse_orb_scanner::models::parse_timestamp;
use nse_orb_scanner::volume::{BaselineSource, SpikeLevel, VolumeSpike, spike_ratio};
use nse_orb_scanner::{
    Action, BarInput, Candle, DataQuality, OrderFlow, ScannerConfig, ScoringConfig, StackState, classify, scan_session,
};
use proptest::prelude::*;
use std::sync::Arc;

fn direction_strategy() -> impl Strategy<Value = BreakoutDirection> {
    prop_oneof![
        Just(BreakoutDirection::Up),
        Just(BreakoutDirection::Down),
        Just(BreakoutDirection::Engulfing),
        Just(BreakoutDirection::None),
    ]
}

fn breakout(direction: BreakoutDirection, strength_pct: f64) -> Breakout {
    Breakout {
        direction,
        strength_pct,
        strength: None,
        near: None,
        price: 100.0,
        boundary: 100.0,
        range_quality: DataQuality::Complete,
    }
}

fn spike(ratio: f64) -> VolumeSpike {
    VolumeSpike {
        volume: ratio * 1_000.0,
        baseline: 1_000.0,
        ratio,
        level: SpikeLevel::Normal,
        source: BaselineSource::Session { bars: 5 },
    }
}

fn stacked(buy_heavy: bool, count: usize, magnitude: f64) -> StackState {
    StackState::Stacked(StackedImbalance {
        direction: if buy_heavy { ImbalanceDirection::BuyHeavy } else { ImbalanceDirection::SellHeavy },
        count,
        window: 3,
        mean_magnitude: magnitude,
        approximated: false,
    })
}

/// Random but valid minute bars starting at the open, each with a snapshot.
fn session_strategy() -> impl Strategy<Value = Vec<BarInput>> {
    prop::collection::vec(
        (-3.0f64..3.0, 0.1f64..4.0, 0.0f64..1.0, 0.0f64..600_000.0, 0.0f64..100_000.0, 0.0f64..100_000.0),
        16..60,
    )
    .prop_map(|rows| {
        let open = parse_timestamp("2025-01-06T09:15:00+05:30").unwrap();
        let mut price = 500.0;
        rows.into_iter()
            .enumerate()
            .map(|(i, (drift, width, close_at, volume, buy, sell))| {
                price = (price + drift).max(10.0);
                let low = price - width / 2.0;
                let high = price + width / 2.0;
                let close = low + (high - low) * close_at;
                let ts = open + chrono::Duration::minutes(i as i64);
                BarInput::new(
                    Candle::new(ts, price, high, low, close, volume),
                    Some(OrderFlow::new(ts, buy, sell)),
                )
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_no_trade_without_breakout(
        direction in prop_oneof![Just(BreakoutDirection::Engulfing), Just(BreakoutDirection::None)],
        ratio in 0.0f64..10.0,
        buy_heavy in any::<bool>(),
        count in 2usize..=3,
        magnitude in 0.2f64..1.0,
    ) {
        let config = ScoringConfig::default();
        let b = breakout(direction, 0.0);
        let signal = classify(Some(&b), Some(&spike(ratio)), &stacked(buy_heavy, count, magnitude), &config);
        prop_assert_eq!(signal.action, Action::Hold);

        let signal = classify(None, Some(&spike(ratio)), &stacked(buy_heavy, count, magnitude), &config);
        prop_assert_eq!(signal.action, Action::Hold);
    }

    #[test]
    fn prop_no_trade_below_volume_threshold(
        direction in direction_strategy(),
        strength in 0.0f64..5.0,
        ratio in 0.0f64..1.999,
        buy_heavy in any::<bool>(),
        count in 2usize..=3,
        magnitude in 0.2f64..1.0,
    ) {
        let config = ScoringConfig::default();
        let b = breakout(direction, strength);
        let signal = classify(Some(&b), Some(&spike(ratio)), &stacked(buy_heavy, count, magnitude), &config);
        prop_assert_eq!(signal.action, Action::Hold);
        prop_assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn prop_no_trade_without_stack(
        direction in direction_strategy(),
        strength in 0.0f64..5.0,
        ratio in 0.0f64..10.0,
        readings in 0usize..5,
        unavailable in any::<bool>(),
    ) {
        let config = ScoringConfig::default();
        let b = breakout(direction, strength);
        let stack = if unavailable {
            StackState::Unavailable { readings }
        } else {
            StackState::NotStacked { readings }
        };
        let signal = classify(Some(&b), Some(&spike(ratio)), &stack, &config);
        prop_assert_eq!(signal.action, Action::Hold);
    }

    #[test]
    fn prop_trades_only_on_aligned_confluence(bars in session_strategy()) {
        let config = Arc::new(ScannerConfig::default());
        let threshold = config.scoring.spike_threshold;
        let report = scan_session("PROP", &bars, config, None);

        for scored in &report.scored {
            let signal = &scored.signal;
            if signal.action == Action::Hold {
                prop_assert_eq!(signal.confidence, 0.0);
                continue;
            }
            let b = signal.breakout.as_ref().unwrap();
            let v = signal.volume_spike.as_ref().unwrap();
            let s = signal.imbalance.stacked().unwrap();
            prop_assert!(v.ratio >= threshold);
            prop_assert!(s.count >= 2);
            prop_assert!((0.0..=100.0).contains(&signal.confidence));
            match signal.action {
                Action::Buy => {
                    prop_assert_eq!(b.direction, BreakoutDirection::Up);
                    prop_assert_eq!(s.direction, ImbalanceDirection::BuyHeavy);
                }
                Action::Sell => {
                    prop_assert_eq!(b.direction, BreakoutDirection::Down);
                    prop_assert_eq!(s.direction, ImbalanceDirection::SellHeavy);
                }
                Action::Hold => unreachable!(),
            }
        }
    }

    #[test]
    fn prop_spike_ratio_monotonic(baseline in 1.0f64..1e7, a in 0.0f64..1e8, b in 0.0f64..1e8) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(spike_ratio(lo, baseline) <= spike_ratio(hi, baseline));
    }

    #[test]
    fn prop_zero_baseline_ratio_is_one(volume in 0.0f64..1e9) {
        let ratio = spike_ratio(volume, 0.0);
        prop_assert_eq!(ratio, 1.0);
        prop_assert!(ratio.is_finite());
    }

    #[test]
    fn prop_imbalance_swap_symmetry(buy in 0.0f64..1e7, sell in 0.0f64..1e7, threshold in 0.0f64..0.9) {
        let forward = imbalance_ratio(buy, sell).unwrap();
        let swapped = imbalance_ratio(sell, buy).unwrap();
        prop_assert_eq!(forward.abs(), swapped.abs());

        let expected = match classify_imbalance(forward, threshold) {
            ImbalanceDirection::BuyHeavy => ImbalanceDirection::SellHeavy,
            ImbalanceDirection::SellHeavy => ImbalanceDirection::BuyHeavy,
            ImbalanceDirection::Neutral => ImbalanceDirection::Neutral,
        };
        prop_assert_eq!(classify_imbalance(swapped, threshold), expected);
    }

    #[test]
    fn prop_classify_deterministic(
        direction in direction_strategy(),
        strength in 0.0f64..5.0,
        ratio in 0.0f64..10.0,
        buy_heavy in any::<bool>(),
        count in 2usize..=3,
        magnitude in 0.2f64..1.0,
    ) {
        let config = ScoringConfig::default();
        let b = breakout(direction, strength);
        let stack = stacked(buy_heavy, count, magnitude);
        let first = serde_json::to_string(&classify(Some(&b), Some(&spike(ratio)), &stack, &config)).unwrap();
        let second = serde_json::to_string(&classify(Some(&b), Some(&spike(ratio)), &stack, &config)).unwrap();
        prop_assert_eq!(first, second);
    }
}
