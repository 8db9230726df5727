use crate::error::ScoringError;
use crate::models::Candle;
use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    Complete,
    /// Fewer bars than the window should hold; scored with a lower weight.
    Partial,
}

/// High/low band of the session's opening window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub established_at: DateTime<FixedOffset>,
    pub bars: usize,
    pub data_quality: DataQuality,
}

impl ReferenceRange {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// Build the reference range from the opening window's bars.
pub fn establish_range(bars: &[Candle], expected_bars: usize) -> Result<ReferenceRange, ScoringError> {
    let first = bars
        .first()
        .ok_or_else(|| ScoringError::insufficient("reference range unavailable: no bars in opening window"))?;

    let (high, low) = bars
        .iter()
        .fold((f64::MIN, f64::MAX), |(h, l), bar| (h.max(bar.high), l.min(bar.low)));

    let data_quality = if bars.len() < expected_bars {
        DataQuality::Partial
    } else {
        DataQuality::Complete
    };

    Ok(ReferenceRange {
        high,
        low,
        open: first.open,
        established_at: bars[bars.len() - 1].timestamp,
        bars: bars.len(),
        data_quality,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeState {
    Forming,
    Ready(ReferenceRange),
    Unavailable,
}

/// Streaming form: absorbs bars opening inside the window, freezes on
/// the first bar past it.
#[derive(Debug, Clone)]
pub struct RangeTracker {
    window_start: DateTime<FixedOffset>,
    window_end: DateTime<FixedOffset>,
    expected_bars: usize,
    bars: Vec<Candle>,
    state: RangeState,
}

impl RangeTracker {
    pub fn new(window_start: DateTime<FixedOffset>, window: Duration, expected_bars: usize) -> Self {
        Self {
            window_start,
            window_end: window_start + window,
            expected_bars,
            bars: Vec::with_capacity(expected_bars),
            state: RangeState::Forming,
        }
    }

    pub fn window_start(&self) -> DateTime<FixedOffset> {
        self.window_start
    }

    pub fn window_end(&self) -> DateTime<FixedOffset> {
        self.window_end
    }

    pub fn state(&self) -> &RangeState {
        &self.state
    }

    pub fn range(&self) -> Option<&ReferenceRange> {
        match &self.state {
            RangeState::Ready(range) => Some(range),
            _ => None,
        }
    }

    pub fn is_forming(&self) -> bool {
        matches!(self.state, RangeState::Forming)
    }

    /// True if the bar opens inside the opening window.
    pub fn in_window(&self, bar: &Candle) -> bool {
        bar.timestamp >= self.window_start && bar.timestamp < self.window_end
    }

    /// Feed a bar. Returns true when the bar was taken into the range.
    /// A bar at or past the window end freezes the range first.
    pub fn absorb(&mut self, bar: &Candle) -> bool {
        if !self.is_forming() {
            return false;
        }
        if self.in_window(bar) {
            self.bars.push(bar.clone());
            if self.bars.len() >= self.expected_bars {
                self.finalize();
            }
            return true;
        }
        if bar.timestamp >= self.window_end {
            self.finalize();
        }
        false
    }

    /// Freeze whatever the window holds. Idempotent.
    pub fn finalize(&mut self) -> &RangeState {
        if self.is_forming() {
            self.state = match establish_range(&self.bars, self.expected_bars) {
                Ok(range) => {
                    tracing::debug!(
                        high = range.high,
                        low = range.low,
                        bars = range.bars,
                        quality = ?range.data_quality,
                        "reference range frozen"
                    );
                    RangeState::Ready(range)
                }
                Err(_) => RangeState::Unavailable,
            };
            self.bars.clear();
        }
        &self.state
    }
}
