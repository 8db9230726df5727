use crate::config::SpikeThresholds;
use crate::error::ScoringError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpikeLevel {
    Normal,
    Moderate,
    High,
    Extreme,
}

impl SpikeLevel {
    pub fn label(&self) -> &'static str {
        match self {
            SpikeLevel::Normal => "normal",
            SpikeLevel::Moderate => "moderate",
            SpikeLevel::High => "high",
            SpikeLevel::Extreme => "extreme",
        }
    }
}

/// Where the baseline volume came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineSource {
    /// Mean of the most recent `bars` session bars.
    Session { bars: usize },
    /// Cross-session average for the same time of day.
    Historical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpike {
    pub volume: f64,
    pub baseline: f64,
    pub ratio: f64,
    pub level: SpikeLevel,
    pub source: BaselineSource,
}

/// `current / baseline`, neutral 1.0 when the baseline is zero or unusable.
pub fn spike_ratio(current: f64, baseline: f64) -> f64 {
    if !baseline.is_finite() || baseline <= 0.0 || !current.is_finite() {
        return 1.0;
    }
    current / baseline
}

pub fn classify_spike(ratio: f64, tiers: &SpikeThresholds) -> SpikeLevel {
    if ratio >= tiers.extreme {
        SpikeLevel::Extreme
    } else if ratio >= tiers.high {
        SpikeLevel::High
    } else if ratio >= tiers.moderate {
        SpikeLevel::Moderate
    } else {
        SpikeLevel::Normal
    }
}

/// Trailing per-bar volume average for one instrument.
#[derive(Debug, Clone)]
pub struct VolumeBaseline {
    window: usize,
    recent: VecDeque<f64>,
    historical: Option<f64>,
}

impl VolumeBaseline {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
            historical: None,
        }
    }

    /// Fallback used until the session has `window` bars of its own.
    pub fn with_historical(mut self, per_bar_average: f64) -> Self {
        if per_bar_average.is_finite() && per_bar_average >= 0.0 {
            self.historical = Some(per_bar_average);
        }
        self
    }

    pub fn set_historical(&mut self, per_bar_average: Option<f64>) {
        self.historical = per_bar_average.filter(|v| v.is_finite() && *v >= 0.0);
    }

    pub fn historical(&self) -> Option<f64> {
        self.historical
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn record(&mut self, volume: f64) {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(volume);
    }

    pub fn baseline(&self) -> Option<(f64, BaselineSource)> {
        if self.recent.len() >= self.window {
            return Some((self.session_mean(), BaselineSource::Session { bars: self.recent.len() }));
        }
        if let Some(avg) = self.historical {
            return Some((avg, BaselineSource::Historical));
        }
        if !self.recent.is_empty() {
            return Some((self.session_mean(), BaselineSource::Session { bars: self.recent.len() }));
        }
        None
    }

    /// Measure a bar against the bars recorded before it.
    pub fn measure(&self, volume: f64, tiers: &SpikeThresholds) -> Result<VolumeSpike, ScoringError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(ScoringError::invalid(format!("volume {} is not a valid bar volume", volume)));
        }
        let (baseline, source) = self
            .baseline()
            .ok_or_else(|| ScoringError::insufficient("volume baseline unavailable: no prior bars"))?;

        let ratio = spike_ratio(volume, baseline);
        Ok(VolumeSpike {
            volume,
            baseline,
            ratio,
            level: classify_spike(ratio, tiers),
            source,
        })
    }

    fn session_mean(&self) -> f64 {
        self.recent.iter().sum::<f64>() / self.recent.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_tiers() {
        let tiers = SpikeThresholds::default();
        assert_eq!(classify_spike(4.0, &tiers), SpikeLevel::Extreme);
        assert_eq!(classify_spike(3.2, &tiers), SpikeLevel::High);
        assert_eq!(classify_spike(2.0, &tiers), SpikeLevel::Moderate);
        assert_eq!(classify_spike(1.99, &tiers), SpikeLevel::Normal);
    }

    #[test]
    fn test_zero_baseline_is_neutral() {
        assert_eq!(spike_ratio(50_000.0, 0.0), 1.0);
        assert_eq!(spike_ratio(0.0, 0.0), 1.0);
    }

    #[test]
    fn test_session_mean_over_last_k() {
        let mut baseline = VolumeBaseline::new(3);
        for v in [900.0, 100.0, 200.0, 300.0] {
            baseline.record(v);
        }
        let (avg, source) = baseline.baseline().unwrap();
        assert_eq!(avg, 200.0);
        assert_eq!(source, BaselineSource::Session { bars: 3 });
    }

    #[test]
    fn test_historical_fallback_when_session_short() {
        let mut baseline = VolumeBaseline::new(5).with_historical(120_000.0);
        baseline.record(10_000.0);
        let spike = baseline.measure(480_000.0, &SpikeThresholds::default()).unwrap();
        assert_eq!(spike.source, BaselineSource::Historical);
        assert_eq!(spike.ratio, 4.0);
        assert_eq!(spike.level, SpikeLevel::Extreme);
    }

    #[test]
    fn test_short_session_without_history_uses_available_bars() {
        let mut baseline = VolumeBaseline::new(5);
        baseline.record(100.0);
        baseline.record(300.0);
        let spike = baseline.measure(400.0, &SpikeThresholds::default()).unwrap();
        assert_eq!(spike.baseline, 200.0);
        assert_eq!(spike.source, BaselineSource::Session { bars: 2 });
    }

    #[test]
    fn test_empty_baseline_is_insufficient() {
        let baseline = VolumeBaseline::new(5);
        let err = baseline.measure(100.0, &SpikeThresholds::default()).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn test_all_zero_history_gives_neutral_ratio() {
        let mut baseline = VolumeBaseline::new(2);
        baseline.record(0.0);
        baseline.record(0.0);
        let spike = baseline.measure(10_000.0, &SpikeThresholds::default()).unwrap();
        assert_eq!(spike.ratio, 1.0);
        assert_eq!(spike.level, SpikeLevel::Normal);
    }
}
