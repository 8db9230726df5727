use crate::breakout::detect_breakout;
use crate::config::ScannerConfig;
use crate::error::ScoringError;
use crate::imbalance::{ImbalanceHistory, ImbalanceReading};
use crate::models::{Candle, OrderFlow, ScoredBar, ist_offset};
use crate::range::{RangeState, RangeTracker};
use crate::scorer::{Action, classify};
use crate::volume::VolumeBaseline;
use chrono::{NaiveDate, TimeZone};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A bar plus the book snapshot captured at its close, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarInput {
    pub candle: Candle,
    pub order_flow: Option<OrderFlow>,
}

impl BarInput {
    pub fn new(candle: Candle, order_flow: Option<OrderFlow>) -> Self {
        Self { candle, order_flow }
    }
}

/// Scoring state for one instrument. Owns its histories outright, so
/// sessions for different instruments never share anything.
#[derive(Debug, Clone)]
pub struct InstrumentSession {
    symbol: String,
    config: Arc<ScannerConfig>,
    session_date: Option<NaiveDate>,
    range: Option<RangeTracker>,
    baseline: VolumeBaseline,
    imbalance: ImbalanceHistory,
}

impl InstrumentSession {
    pub fn new(symbol: impl Into<String>, config: Arc<ScannerConfig>) -> Self {
        let baseline = VolumeBaseline::new(config.scoring.baseline_window);
        let imbalance = ImbalanceHistory::new(config.scoring.history_capacity);
        Self {
            symbol: symbol.into(),
            config,
            session_date: None,
            range: None,
            baseline,
            imbalance,
        }
    }

    /// Cross-session per-bar volume used until the session builds its own.
    pub fn with_historical_volume(mut self, per_bar_average: f64) -> Self {
        self.baseline.set_historical(Some(per_bar_average));
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn range_state(&self) -> Option<&RangeState> {
        self.range.as_ref().map(|r| r.state())
    }

    pub fn imbalance_history(&self) -> &ImbalanceHistory {
        &self.imbalance
    }

    /// Feed one bar.
    ///
    /// Returns `InvalidInput` for a malformed bar (state untouched) and
    /// `InsufficientData` for pre-open bars and bars inside the opening
    /// window. Every later bar yields a [`ScoredBar`], HOLD when an input
    /// is missing.
    pub fn on_bar(&mut self, candle: &Candle, order_flow: Option<&OrderFlow>) -> Result<ScoredBar, ScoringError> {
        candle.validate()?;

        let date = trading_date(candle);
        if self.session_date != Some(date) {
            self.start_day(candle);
        }

        let reading = self.imbalance_reading(candle, order_flow);
        let scoring = &self.config.scoring;

        let Some(tracker) = self.range.as_mut() else {
            return Err(ScoringError::insufficient("session not started"));
        };

        if candle.timestamp < tracker.window_start() {
            return Err(ScoringError::insufficient(format!(
                "bar at {} precedes the session open",
                candle.timestamp
            )));
        }

        if tracker.is_forming() && tracker.absorb(candle) {
            self.baseline.record(candle.volume);
            if let Some(reading) = reading {
                self.imbalance.push(reading);
            }
            return Err(ScoringError::insufficient("reference range still forming"));
        }

        let breakout = match tracker.state() {
            RangeState::Ready(range) => Some(detect_breakout(
                candle,
                range,
                scoring.breakout_near_tolerance_pct,
                &scoring.breakout_strength_thresholds,
            )),
            _ => None,
        };

        let volume = match self.baseline.measure(candle.volume, &scoring.volume_spike_thresholds) {
            Ok(spike) => Some(spike),
            Err(e) => {
                debug!(symbol = %self.symbol, error = %e, "no volume baseline for bar");
                None
            }
        };

        if let Some(reading) = reading {
            self.imbalance.push(reading);
        }
        let stack = self
            .imbalance
            .stacked(scoring.stacked_window_size, scoring.stacked_min_agreement);

        let signal = classify(breakout.as_ref(), volume.as_ref(), &stack, scoring);
        self.baseline.record(candle.volume);

        debug!(
            symbol = %self.symbol,
            timestamp = %candle.timestamp,
            action = signal.action.as_str(),
            confidence = signal.confidence,
            "bar scored"
        );

        Ok(ScoredBar {
            symbol: self.symbol.clone(),
            candle: candle.clone(),
            signal,
        })
    }

    fn start_day(&mut self, candle: &Candle) {
        let date = trading_date(candle);
        let window_start = ist_offset()
            .from_local_datetime(&date.and_time(self.config.session_open))
            .single()
            .unwrap_or(candle.timestamp);

        let expected = self.config.scoring.expected_range_bars(self.config.interval);
        self.range = Some(RangeTracker::new(window_start, self.config.reference_window(), expected));
        self.session_date = Some(date);

        let historical = self.baseline.historical();
        self.baseline = VolumeBaseline::new(self.config.scoring.baseline_window);
        self.baseline.set_historical(historical);
        self.imbalance = ImbalanceHistory::new(self.config.scoring.history_capacity);
    }

    fn imbalance_reading(&self, candle: &Candle, order_flow: Option<&OrderFlow>) -> Option<ImbalanceReading> {
        let threshold = self.config.scoring.imbalance_threshold;
        match order_flow {
            Some(flow) => match ImbalanceReading::from_order_flow(flow, threshold) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, "discarding order flow snapshot");
                    None
                }
            },
            None if self.config.scoring.approximate_missing_imbalance => {
                Some(ImbalanceReading::approximate_from_candle(candle, threshold))
            }
            None => None,
        }
    }
}

/// Exchange calendar date of a bar, whatever offset the feed stamped it with.
fn trading_date(candle: &Candle) -> NaiveDate {
    candle.timestamp.with_timezone(&ist_offset()).date_naive()
}

/// Outcome of replaying one instrument's bars.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub symbol: String,
    pub scored: Vec<ScoredBar>,
    /// Bars consumed without a score: pre-open or inside the opening window.
    pub warmup_bars: usize,
    pub rejected: Vec<String>,
}

impl SessionReport {
    pub fn trades(&self) -> impl Iterator<Item = &ScoredBar> {
        self.scored.iter().filter(|b| b.signal.action != Action::Hold)
    }
}

/// Replay a day of bars through a fresh session.
pub fn scan_session(
    symbol: &str,
    bars: &[BarInput],
    config: Arc<ScannerConfig>,
    historical_volume: Option<f64>,
) -> SessionReport {
    let mut session = InstrumentSession::new(symbol, config);
    if let Some(avg) = historical_volume {
        session = session.with_historical_volume(avg);
    }

    let mut report = SessionReport {
        symbol: symbol.to_string(),
        ..SessionReport::default()
    };

    for input in bars {
        match session.on_bar(&input.candle, input.order_flow.as_ref()) {
            Ok(scored) => report.scored.push(scored),
            Err(ScoringError::InsufficientData(_)) => report.warmup_bars += 1,
            Err(e) => {
                warn!(symbol, error = %e, "bar rejected");
                report.rejected.push(e.to_string());
            }
        }
    }

    report
}

/// Replay many instruments in parallel, one independent session each.
/// Reports come back sorted by symbol.
pub fn scan_universe(
    universe: &HashMap<String, Vec<BarInput>>,
    config: Arc<ScannerConfig>,
    historical_volume: &HashMap<String, f64>,
) -> Vec<SessionReport> {
    let mut reports: Vec<SessionReport> = universe
        .par_iter()
        .map(|(symbol, bars)| {
            scan_session(
                symbol,
                bars,
                Arc::clone(&config),
                historical_volume.get(symbol).copied(),
            )
        })
        .collect();

    reports.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    reports
}
