use crate::error::ScoringError;
use crate::models::{Candle, OrderFlow};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImbalanceDirection {
    BuyHeavy,
    SellHeavy,
    Neutral,
}

impl ImbalanceDirection {
    pub fn label(&self) -> &'static str {
        match self {
            ImbalanceDirection::BuyHeavy => "buy-heavy",
            ImbalanceDirection::SellHeavy => "sell-heavy",
            ImbalanceDirection::Neutral => "neutral",
        }
    }
}

/// How a reading was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Book snapshot captured at bar close.
    Live,
    /// Proxy derived from the candle itself; lower confidence.
    Approximated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceReading {
    pub direction: ImbalanceDirection,
    /// Signed imbalance in [-1, 1].
    pub imbalance: f64,
    pub magnitude: f64,
    pub timestamp: DateTime<FixedOffset>,
    pub provenance: Provenance,
}

/// `(buy - sell) / (buy + sell)` clamped to [-1, 1]; zero total reads as 0.
pub fn imbalance_ratio(buy_quantity: f64, sell_quantity: f64) -> Result<f64, ScoringError> {
    if !buy_quantity.is_finite() || !sell_quantity.is_finite() {
        return Err(ScoringError::invalid("order flow quantities must be finite"));
    }
    if buy_quantity < 0.0 || sell_quantity < 0.0 {
        return Err(ScoringError::invalid(format!(
            "negative order flow quantity (buy {}, sell {})",
            buy_quantity, sell_quantity
        )));
    }
    let total = buy_quantity + sell_quantity;
    if total == 0.0 {
        return Ok(0.0);
    }
    Ok(((buy_quantity - sell_quantity) / total).clamp(-1.0, 1.0))
}

pub fn classify_imbalance(imbalance: f64, threshold: f64) -> ImbalanceDirection {
    if imbalance > threshold {
        ImbalanceDirection::BuyHeavy
    } else if imbalance < -threshold {
        ImbalanceDirection::SellHeavy
    } else {
        ImbalanceDirection::Neutral
    }
}

impl ImbalanceReading {
    fn from_ratio(imbalance: f64, threshold: f64, timestamp: DateTime<FixedOffset>, provenance: Provenance) -> Self {
        Self {
            direction: classify_imbalance(imbalance, threshold),
            imbalance,
            magnitude: imbalance.abs(),
            timestamp,
            provenance,
        }
    }

    pub fn from_order_flow(flow: &OrderFlow, threshold: f64) -> Result<Self, ScoringError> {
        let ratio = imbalance_ratio(flow.buy_quantity, flow.sell_quantity)?;
        Ok(Self::from_ratio(ratio, threshold, flow.timestamp, Provenance::Live))
    }

    /// Close-location proxy: +1 when the bar closes on its high, -1 on its low.
    pub fn approximate_from_candle(bar: &Candle, threshold: f64) -> Self {
        let width = bar.high - bar.low;
        let ratio = if width > 0.0 {
            (((bar.close - bar.low) - (bar.high - bar.close)) / width).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self::from_ratio(ratio, threshold, bar.timestamp, Provenance::Approximated)
    }
}

/// Directional pressure agreed on by recent readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedImbalance {
    pub direction: ImbalanceDirection,
    pub count: usize,
    pub window: usize,
    pub mean_magnitude: f64,
    pub approximated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StackState {
    /// Not enough readings captured to judge stacking.
    Unavailable { readings: usize },
    NotStacked { readings: usize },
    Stacked(StackedImbalance),
}

impl StackState {
    pub fn stacked(&self) -> Option<&StackedImbalance> {
        match self {
            StackState::Stacked(s) => Some(s),
            _ => None,
        }
    }
}

/// Bounded FIFO of readings for one instrument.
#[derive(Debug, Clone)]
pub struct ImbalanceHistory {
    capacity: usize,
    readings: VecDeque<ImbalanceReading>,
}

impl ImbalanceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, reading: ImbalanceReading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn readings(&self) -> impl Iterator<Item = &ImbalanceReading> {
        self.readings.iter()
    }

    pub fn latest(&self) -> Option<&ImbalanceReading> {
        self.readings.back()
    }

    /// Stacked when at least `min_agreement` of the last `window` readings
    /// share one non-neutral direction and outnumber the opposite side.
    /// An even split is a conflict and never stacks.
    pub fn stacked(&self, window: usize, min_agreement: usize) -> StackState {
        let available = self.readings.len();
        if available < min_agreement.max(1) {
            return StackState::Unavailable { readings: available };
        }

        let recent: Vec<&ImbalanceReading> = self.readings.iter().rev().take(window).collect();
        let side = |direction: ImbalanceDirection| {
            recent.iter().copied().filter(|r| r.direction == direction).collect::<Vec<_>>()
        };
        let buys = side(ImbalanceDirection::BuyHeavy);
        let sells = side(ImbalanceDirection::SellHeavy);

        let (direction, agreeing) = match buys.len().cmp(&sells.len()) {
            Ordering::Greater => (ImbalanceDirection::BuyHeavy, buys),
            Ordering::Less => (ImbalanceDirection::SellHeavy, sells),
            Ordering::Equal => return StackState::NotStacked { readings: recent.len() },
        };

        if agreeing.len() >= min_agreement {
            let mean_magnitude = agreeing.iter().map(|r| r.magnitude).sum::<f64>() / agreeing.len() as f64;
            return StackState::Stacked(StackedImbalance {
                direction,
                count: agreeing.len(),
                window: recent.len(),
                mean_magnitude,
                approximated: agreeing.iter().any(|r| r.provenance == Provenance::Approximated),
            });
        }

        StackState::NotStacked { readings: recent.len() }
    }
}
