use crate::config::StrengthThresholds;
use crate::models::Candle;
use crate::range::{DataQuality, ReferenceRange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutDirection {
    Up,
    Down,
    /// Bar pierced both sides of the range; no directional read.
    Engulfing,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutStrength {
    Weak,
    Moderate,
    Strong,
}

/// Early warning: price within tolerance of a boundary without crossing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NearBreakout {
    NearUp,
    NearDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
    pub direction: BreakoutDirection,
    /// Percent beyond the crossed boundary; 0 when nothing was crossed.
    pub strength_pct: f64,
    pub strength: Option<BreakoutStrength>,
    pub near: Option<NearBreakout>,
    pub price: f64,
    pub boundary: f64,
    pub range_quality: DataQuality,
}

impl Breakout {
    pub fn is_directional(&self) -> bool {
        matches!(self.direction, BreakoutDirection::Up | BreakoutDirection::Down)
    }
}

pub fn classify_strength(strength_pct: f64, tiers: &StrengthThresholds) -> BreakoutStrength {
    if strength_pct > tiers.strong {
        BreakoutStrength::Strong
    } else if strength_pct > tiers.moderate {
        BreakoutStrength::Moderate
    } else {
        BreakoutStrength::Weak
    }
}

fn pct_beyond(price: f64, boundary: f64) -> f64 {
    if boundary <= 0.0 {
        return 0.0;
    }
    (price - boundary).abs() / boundary * 100.0
}

/// Compare a bar against the frozen reference range. Crossing is strict:
/// a high equal to `range.high` is not a breakout.
pub fn detect_breakout(
    bar: &Candle,
    range: &ReferenceRange,
    near_tolerance_pct: f64,
    tiers: &StrengthThresholds,
) -> Breakout {
    let up = bar.high > range.high;
    let down = bar.low < range.low;

    match (up, down) {
        (true, false) => {
            let strength_pct = pct_beyond(bar.high, range.high);
            Breakout {
                direction: BreakoutDirection::Up,
                strength_pct,
                strength: Some(classify_strength(strength_pct, tiers)),
                near: None,
                price: bar.high,
                boundary: range.high,
                range_quality: range.data_quality,
            }
        }
        (false, true) => {
            let strength_pct = pct_beyond(bar.low, range.low);
            Breakout {
                direction: BreakoutDirection::Down,
                strength_pct,
                strength: Some(classify_strength(strength_pct, tiers)),
                near: None,
                price: bar.low,
                boundary: range.low,
                range_quality: range.data_quality,
            }
        }
        (true, true) => Breakout {
            direction: BreakoutDirection::Engulfing,
            strength_pct: 0.0,
            strength: None,
            near: None,
            price: bar.close,
            boundary: range.high,
            range_quality: range.data_quality,
        },
        (false, false) => {
            let tolerance = near_tolerance_pct / 100.0;
            let near_up = bar.high >= range.high * (1.0 - tolerance);
            let near_down = bar.low <= range.low * (1.0 + tolerance);
            let (near, price, boundary) = match (near_up, near_down) {
                (true, false) => (Some(NearBreakout::NearUp), bar.high, range.high),
                (false, true) => (Some(NearBreakout::NearDown), bar.low, range.low),
                // narrow range: report the edge the bar sits closer to
                (true, true) if range.high - bar.high <= bar.low - range.low => {
                    (Some(NearBreakout::NearUp), bar.high, range.high)
                }
                (true, true) => (Some(NearBreakout::NearDown), bar.low, range.low),
                (false, false) => (None, bar.close, range.high),
            };
            Breakout {
                direction: BreakoutDirection::None,
                strength_pct: 0.0,
                strength: None,
                near,
                price,
                boundary,
                range_quality: range.data_quality,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_timestamp;

    fn range() -> ReferenceRange {
        ReferenceRange {
            high: 870.0,
            low: 845.0,
            open: 850.0,
            established_at: parse_timestamp("2025-01-06T09:29:00+05:30").unwrap(),
            bars: 15,
            data_quality: DataQuality::Complete,
        }
    }

    fn bar(high: f64, low: f64) -> Candle {
        let ts = parse_timestamp("2025-01-06T09:45:00+05:30").unwrap();
        Candle::new(ts, low, high, low, high, 1000.0)
    }

    fn detect(b: &Candle) -> Breakout {
        detect_breakout(b, &range(), 0.1, &StrengthThresholds::default())
    }

    #[test]
    fn test_equal_high_is_not_breakout() {
        let b = detect(&bar(870.0, 860.0));
        assert_eq!(b.direction, BreakoutDirection::None);
        assert_eq!(b.near, Some(NearBreakout::NearUp));
    }

    #[test]
    fn test_one_tick_above_is_breakout() {
        let b = detect(&bar(870.05, 860.0));
        assert_eq!(b.direction, BreakoutDirection::Up);
        assert_eq!(b.strength, Some(BreakoutStrength::Weak));
    }

    #[test]
    fn test_strength_tiers() {
        assert_eq!(detect(&bar(880.0, 860.0)).strength, Some(BreakoutStrength::Moderate));
        assert_eq!(detect(&bar(890.0, 860.0)).strength, Some(BreakoutStrength::Strong));
    }

    #[test]
    fn test_breakdown() {
        let b = detect(&bar(850.0, 830.0));
        assert_eq!(b.direction, BreakoutDirection::Down);
        assert!((b.strength_pct - 15.0 / 845.0 * 100.0).abs() < 1e-9);
        assert_eq!(b.strength, Some(BreakoutStrength::Moderate));
    }

    #[test]
    fn test_engulfing_bar_is_not_directional() {
        let b = detect(&bar(880.0, 840.0));
        assert_eq!(b.direction, BreakoutDirection::Engulfing);
        assert!(!b.is_directional());
    }

    #[test]
    fn test_inside_bar_far_from_edges() {
        let b = detect(&bar(860.0, 855.0));
        assert_eq!(b.direction, BreakoutDirection::None);
        assert_eq!(b.near, None);
    }

    #[test]
    fn test_narrow_range_reports_closer_edge() {
        let narrow = ReferenceRange { high: 100.1, low: 100.0, open: 100.05, ..range() };
        let tiers = StrengthThresholds::default();

        let b = detect_breakout(&bar(100.08, 100.03), &narrow, 0.5, &tiers);
        assert_eq!(b.direction, BreakoutDirection::None);
        assert_eq!(b.near, Some(NearBreakout::NearUp));
        assert_eq!(b.boundary, 100.1);

        let b = detect_breakout(&bar(100.05, 100.01), &narrow, 0.5, &tiers);
        assert_eq!(b.near, Some(NearBreakout::NearDown));
        assert_eq!(b.boundary, 100.0);
    }
}
