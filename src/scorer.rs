use crate::breakout::{Breakout, BreakoutDirection, NearBreakout};
use crate::config::ScoringConfig;
use crate::imbalance::{ImbalanceDirection, StackState, StackedImbalance};
use crate::range::DataQuality;
use crate::volume::VolumeSpike;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }
}

/// Output of [`classify`]. Plain data, safe to log, persist or render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    /// 0 to 100, one decimal place.
    pub confidence: f64,
    pub breakout: Option<Breakout>,
    pub volume_spike: Option<VolumeSpike>,
    pub imbalance: StackState,
    pub reasoning: String,
}

impl Signal {
    /// HOLD with zero confidence, naming why nothing could be scored.
    pub fn no_signal(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            breakout: None,
            volume_spike: None,
            imbalance: StackState::Unavailable { readings: 0 },
            reasoning: reason.into(),
        }
    }

    pub fn is_trade(&self) -> bool {
        self.action != Action::Hold
    }
}

// Confidence weights
const BREAKOUT_WEIGHT: f64 = 0.3;
const VOLUME_WEIGHT: f64 = 0.4;
const IMBALANCE_WEIGHT: f64 = 0.3;
const CONFLUENCE_FLOOR: f64 = 50.0;

/// Combine the three signals into one action.
///
/// BUY or SELL only when breakout, volume and stacked imbalance all hold
/// and point the same way. Anything less is HOLD with confidence 0.
pub fn classify(
    breakout: Option<&Breakout>,
    volume: Option<&VolumeSpike>,
    imbalance: &StackState,
    config: &ScoringConfig,
) -> Signal {
    let mut reasons = Vec::new();

    match breakout {
        Some(b) => reasons.push(describe_breakout(b)),
        None => reasons.push("reference range unavailable".to_string()),
    }
    match volume {
        Some(v) => reasons.push(describe_volume(v, config)),
        None => reasons.push("volume baseline unavailable".to_string()),
    }
    reasons.push(describe_imbalance(imbalance, config));

    let direction = breakout.map(|b| b.direction);
    let volume_ok = volume.is_some_and(|v| v.ratio >= config.spike_threshold);
    let stack = imbalance
        .stacked()
        .filter(|s| s.count >= config.stacked_min_agreement);

    let action = match (direction, volume_ok, stack.map(|s| s.direction)) {
        (Some(BreakoutDirection::Up), true, Some(ImbalanceDirection::BuyHeavy)) => Action::Buy,
        (Some(BreakoutDirection::Down), true, Some(ImbalanceDirection::SellHeavy)) => Action::Sell,
        (Some(BreakoutDirection::Up), true, Some(ImbalanceDirection::SellHeavy))
        | (Some(BreakoutDirection::Down), true, Some(ImbalanceDirection::BuyHeavy)) => {
            reasons.push("mixed signal: breakout and order flow point in opposite directions".to_string());
            Action::Hold
        }
        _ => {
            let met = [breakout.is_some_and(|b| b.is_directional()), volume_ok, stack.is_some()]
                .iter()
                .filter(|c| **c)
                .count();
            if met > 0 {
                reasons.push(format!("partial confluence ({} of 3 conditions met): holding", met));
            }
            Action::Hold
        }
    };

    let confidence = match (action, breakout, volume, stack) {
        (Action::Buy | Action::Sell, Some(b), Some(v), Some(s)) => {
            let score = confidence_score(b, v, s, config);
            if b.range_quality == DataQuality::Partial {
                reasons.push("reference range is partial; confidence reduced".to_string());
            }
            if s.approximated {
                reasons.push("imbalance includes approximated readings; confidence reduced".to_string());
            }
            score
        }
        _ => 0.0,
    };

    if action != Action::Hold {
        reasons.push(format!("all three conditions agree: {}", action.as_str()));
    }

    Signal {
        action,
        confidence,
        breakout: breakout.cloned(),
        volume_spike: volume.cloned(),
        imbalance: imbalance.clone(),
        reasoning: reasons.join("; "),
    }
}

/// Linear position of `value` between `threshold` and `saturation`, in [0, 1].
fn interpolate(value: f64, threshold: f64, saturation: f64) -> f64 {
    if saturation <= threshold {
        return if value >= threshold { 1.0 } else { 0.0 };
    }
    ((value - threshold) / (saturation - threshold)).clamp(0.0, 1.0)
}

fn confidence_score(b: &Breakout, v: &VolumeSpike, s: &StackedImbalance, config: &ScoringConfig) -> f64 {
    let breakout_term = interpolate(b.strength_pct, 0.0, config.breakout_strength_thresholds.strong);
    let volume_term = interpolate(v.ratio, config.spike_threshold, config.volume_saturation);
    let magnitude_term = interpolate(s.mean_magnitude, config.imbalance_threshold, config.imbalance_saturation);
    let count_term = interpolate(
        s.count as f64,
        config.stacked_min_agreement as f64,
        config.stacked_window_size as f64,
    );
    let imbalance_term = 0.7 * magnitude_term + 0.3 * count_term;

    let mut score = CONFLUENCE_FLOOR
        + (100.0 - CONFLUENCE_FLOOR)
            * (BREAKOUT_WEIGHT * breakout_term + VOLUME_WEIGHT * volume_term + IMBALANCE_WEIGHT * imbalance_term);

    if b.range_quality == DataQuality::Partial {
        score *= config.partial_range_penalty;
    }
    if s.approximated {
        score *= config.approximated_imbalance_penalty;
    }

    ((score * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

fn describe_breakout(b: &Breakout) -> String {
    match b.direction {
        BreakoutDirection::Up => format!(
            "breakout-up {:.2}% above range high {:.2} ({:?})",
            b.strength_pct,
            b.boundary,
            b.strength.unwrap_or(crate::breakout::BreakoutStrength::Weak)
        )
        .to_lowercase(),
        BreakoutDirection::Down => format!(
            "breakout-down {:.2}% below range low {:.2} ({:?})",
            b.strength_pct,
            b.boundary,
            b.strength.unwrap_or(crate::breakout::BreakoutStrength::Weak)
        )
        .to_lowercase(),
        BreakoutDirection::Engulfing => "bar pierced both sides of the range; no directional breakout".to_string(),
        BreakoutDirection::None => match b.near {
            Some(NearBreakout::NearUp) => format!("no breakout; price near range high {:.2}", b.boundary),
            Some(NearBreakout::NearDown) => format!("no breakout; price near range low {:.2}", b.boundary),
            None => "no breakout; bar inside reference range".to_string(),
        },
    }
}

fn describe_volume(v: &VolumeSpike, config: &ScoringConfig) -> String {
    let verdict = if v.ratio >= config.spike_threshold {
        "meets"
    } else {
        "below"
    };
    format!(
        "{} volume {:.2}x baseline {:.0} ({} {:.2}x threshold)",
        v.level.label(),
        v.ratio,
        v.baseline,
        verdict,
        config.spike_threshold
    )
}

fn describe_imbalance(state: &StackState, config: &ScoringConfig) -> String {
    match state {
        StackState::Stacked(s) => format!(
            "{} of last {} readings stacked {} (mean magnitude {:.2})",
            s.count,
            s.window,
            s.direction.label(),
            s.mean_magnitude
        ),
        StackState::NotStacked { readings } => format!(
            "no stacked imbalance: fewer than {} of last {} readings agree",
            config.stacked_min_agreement, readings
        ),
        StackState::Unavailable { readings } => format!(
            "imbalance history unavailable ({} of {} readings captured)",
            readings, config.stacked_min_agreement
        ),
    }
}
