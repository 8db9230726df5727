use crate::error::ScoringError;
use crate::scorer::Signal;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// Reject malformed bars before they reach any calculation.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ScoringError::invalid(format!(
                    "bar at {} has non-finite {}",
                    self.timestamp, name
                )));
            }
        }

        if self.low <= 0.0 {
            return Err(ScoringError::invalid(format!(
                "bar at {} has non-positive low {}",
                self.timestamp, self.low
            )));
        }
        if self.high < self.low {
            return Err(ScoringError::invalid(format!(
                "bar at {} has high {} below low {}",
                self.timestamp, self.high, self.low
            )));
        }
        for (name, price) in [("open", self.open), ("close", self.close)] {
            if price < self.low || price > self.high {
                return Err(ScoringError::invalid(format!(
                    "bar at {} has {} {} outside [{}, {}]",
                    self.timestamp, name, price, self.low, self.high
                )));
            }
        }
        if self.volume < 0.0 {
            return Err(ScoringError::invalid(format!(
                "bar at {} has negative volume {}",
                self.timestamp, self.volume
            )));
        }

        Ok(())
    }
}

/// Aggregate resting quantities from one order book snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFlow {
    pub timestamp: DateTime<FixedOffset>,
    pub buy_quantity: f64,
    pub sell_quantity: f64,
}

impl OrderFlow {
    pub fn new(timestamp: DateTime<FixedOffset>, buy_quantity: f64, sell_quantity: f64) -> Self {
        Self { timestamp, buy_quantity, sell_quantity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Equity,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub token: u32,
    pub exchange: String,
    pub kind: InstrumentKind,
}

impl Instrument {
    pub fn equity(symbol: impl Into<String>, token: u32) -> Self {
        Self {
            symbol: symbol.into(),
            token,
            exchange: "NSE".to_string(),
            kind: InstrumentKind::Equity,
        }
    }

    pub fn index(symbol: impl Into<String>, token: u32) -> Self {
        Self {
            symbol: symbol.into(),
            token,
            exchange: "NSE".to_string(),
            kind: InstrumentKind::Index,
        }
    }
}

/// Bar size as understood by the broker's historical API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Minute,
    FiveMinute,
    FifteenMinute,
    Day,
}

impl Interval {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::FiveMinute => "5minute",
            Interval::FifteenMinute => "15minute",
            Interval::Day => "day",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim() {
            "minute" | "1minute" => Some(Interval::Minute),
            "5minute" => Some(Interval::FiveMinute),
            "15minute" => Some(Interval::FifteenMinute),
            "day" => Some(Interval::Day),
            _ => None,
        }
    }

    /// Bar length in minutes. A day bar spans the 375 minute NSE cash session.
    pub fn minutes(&self) -> u32 {
        match self {
            Interval::Minute => 1,
            Interval::FiveMinute => 5,
            Interval::FifteenMinute => 15,
            Interval::Day => 375,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes() as i64)
    }
}

/// One scored bar. Created once per bar and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredBar {
    pub symbol: String,
    pub candle: Candle,
    pub signal: Signal,
}

/// Indian Standard Time, the offset every NSE timestamp carries.
pub fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or_else(|| Utc.fix())
}

/// Parse broker timestamps: RFC 3339 or the `+0530` offset form.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, ScoringError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .map_err(|e| ScoringError::invalid(format!("bad timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<FixedOffset> {
        parse_timestamp("2025-01-06T09:15:00+05:30").unwrap()
    }

    #[test]
    fn test_valid_candle() {
        let bar = Candle::new(ts(), 100.0, 101.0, 99.5, 100.5, 1000.0);
        assert!(bar.validate().is_ok());
    }

    #[test]
    fn test_high_below_low_rejected() {
        let bar = Candle::new(ts(), 100.0, 99.0, 101.0, 100.0, 1000.0);
        assert!(matches!(bar.validate(), Err(ScoringError::InvalidInput(_))));
    }

    #[test]
    fn test_negative_volume_rejected() {
        let bar = Candle::new(ts(), 100.0, 101.0, 99.0, 100.0, -5.0);
        assert!(bar.validate().is_err());
    }

    #[test]
    fn test_nan_rejected() {
        let bar = Candle::new(ts(), 100.0, f64::NAN, 99.0, 100.0, 5.0);
        assert!(bar.validate().is_err());
    }

    #[test]
    fn test_parse_broker_offset_form() {
        let parsed = parse_timestamp("2025-01-06T09:15:00+0530").unwrap();
        assert_eq!(parsed, ts());
    }

    #[test]
    fn test_interval_wire_names() {
        assert_eq!(Interval::from_wire("5minute"), Some(Interval::FiveMinute));
        assert_eq!(Interval::FiveMinute.wire_name(), "5minute");
        assert_eq!(Interval::from_wire("hour"), None);
    }
}
