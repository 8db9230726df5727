use crate::error::ScoringError;
use crate::models::Interval;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// -----------------------------------------------
// BROKER API ENDPOINTS
// -----------------------------------------------
pub const BROKER_BASE_URL: &str = "https://api.kite.trade";
pub const BROKER_API_VERSION: &str = "3";

pub fn historical_candles_url(base: &str, token: u32, interval: &str, from: &str, to: &str) -> String {
    format!(
        "{}/instruments/historical/{}/{}?from={}&to={}",
        base,
        token,
        interval,
        urlencoding::encode(from),
        urlencoding::encode(to)
    )
}

pub fn quote_url(base: &str, exchange: &str, symbol: &str) -> String {
    let key = format!("{}:{}", exchange, symbol);
    format!("{}/quote?i={}", base, urlencoding::encode(&key))
}

// -----------------------------------------------
// LLM API ENDPOINTS
// -----------------------------------------------
pub const LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const LLM_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const LLM_MAX_TOKENS: u32 = 400;

// -----------------------------------------------
// HTTP CLIENT CONFIG
// -----------------------------------------------
pub const USER_AGENT: &str = concat!("nse-orb-scanner/", env!("CARGO_PKG_VERSION"));
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(20);
pub const LLM_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

// -----------------------------------------------
// RETRY CONFIG
// -----------------------------------------------
pub const RETRY_BASE_DELAY_MS: u64 = 100;
pub const RETRY_FACTOR: u64 = 2;
pub const RETRY_MAX_DELAY_SECS: u64 = 3;
pub const RETRY_MAX_ATTEMPTS: usize = 3;

// -----------------------------------------------
// CONCURRENCY LIMITS
// -----------------------------------------------
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

// -----------------------------------------------
// SESSION
// -----------------------------------------------
pub const SESSION_OPEN_HOUR: u32 = 9;
pub const SESSION_OPEN_MINUTE: u32 = 15;
pub const DEFAULT_SYMBOLS: &[&str] = &["RELIANCE", "TCS", "INFY", "HDFCBANK", "ICICIBANK", "SBIN"];

// -----------------------------------------------
// SCORING DEFAULTS
// -----------------------------------------------
pub const DEFAULT_REFERENCE_WINDOW_MINUTES: u32 = 15;
pub const DEFAULT_BASELINE_WINDOW: usize = 5;
pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
pub const DEFAULT_STACKED_WINDOW: usize = 3;
pub const DEFAULT_STACKED_MIN_AGREEMENT: usize = 2;

/// Volume ratio tiers used to label a bar's spike level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeThresholds {
    pub extreme: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self { extreme: 4.0, high: 3.0, moderate: 2.0 }
    }
}

/// Breakout strength tiers, in percent beyond the range boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrengthThresholds {
    pub strong: f64,
    pub moderate: f64,
}

impl Default for StrengthThresholds {
    fn default() -> Self {
        Self { strong: 2.0, moderate: 1.0 }
    }
}

/// Every knob the scoring pipeline reads. Business policy lives here and
/// nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub reference_window_minutes: u32,
    pub volume_spike_thresholds: SpikeThresholds,
    /// Minimum spike ratio for a bar to count toward BUY/SELL.
    pub spike_threshold: f64,
    /// Spike ratio at which the volume term of confidence saturates.
    pub volume_saturation: f64,
    pub baseline_window: usize,
    pub imbalance_threshold: f64,
    pub imbalance_saturation: f64,
    pub history_capacity: usize,
    pub stacked_window_size: usize,
    pub stacked_min_agreement: usize,
    pub breakout_near_tolerance_pct: f64,
    pub breakout_strength_thresholds: StrengthThresholds,
    pub partial_range_penalty: f64,
    pub approximated_imbalance_penalty: f64,
    /// Derive a flagged imbalance proxy from the candle when no book
    /// snapshot was captured for the bar.
    pub approximate_missing_imbalance: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            reference_window_minutes: DEFAULT_REFERENCE_WINDOW_MINUTES,
            volume_spike_thresholds: SpikeThresholds::default(),
            spike_threshold: 2.0,
            volume_saturation: 4.0,
            baseline_window: DEFAULT_BASELINE_WINDOW,
            imbalance_threshold: 0.2,
            imbalance_saturation: 0.6,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stacked_window_size: DEFAULT_STACKED_WINDOW,
            stacked_min_agreement: DEFAULT_STACKED_MIN_AGREEMENT,
            breakout_near_tolerance_pct: 0.1,
            breakout_strength_thresholds: StrengthThresholds::default(),
            partial_range_penalty: 0.85,
            approximated_imbalance_penalty: 0.7,
            approximate_missing_imbalance: false,
        }
    }
}

impl ScoringConfig {
    /// Reject thresholds outside sane bounds. Run once at startup.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ScoringError::config(format!("{} must be a positive number, got {}", name, v)))
            }
        };

        if self.reference_window_minutes == 0 {
            return Err(ScoringError::config("reference_window_minutes must be at least 1"));
        }

        let tiers = &self.volume_spike_thresholds;
        positive("volume_spike_thresholds.moderate", tiers.moderate)?;
        positive("volume_spike_thresholds.high", tiers.high)?;
        positive("volume_spike_thresholds.extreme", tiers.extreme)?;
        if !(tiers.moderate < tiers.high && tiers.high < tiers.extreme) {
            return Err(ScoringError::config(format!(
                "volume spike tiers must increase: moderate {} < high {} < extreme {}",
                tiers.moderate, tiers.high, tiers.extreme
            )));
        }

        positive("spike_threshold", self.spike_threshold)?;
        if self.volume_saturation <= self.spike_threshold {
            return Err(ScoringError::config(format!(
                "volume_saturation ({}) must exceed spike_threshold ({})",
                self.volume_saturation, self.spike_threshold
            )));
        }

        if self.baseline_window == 0 {
            return Err(ScoringError::config("baseline_window must be at least 1"));
        }

        if !(self.imbalance_threshold >= 0.0 && self.imbalance_threshold < 1.0) {
            return Err(ScoringError::config(format!(
                "imbalance_threshold must be in [0, 1), got {}",
                self.imbalance_threshold
            )));
        }
        if !(self.imbalance_saturation > self.imbalance_threshold && self.imbalance_saturation <= 1.0) {
            return Err(ScoringError::config(format!(
                "imbalance_saturation must be in ({}, 1], got {}",
                self.imbalance_threshold, self.imbalance_saturation
            )));
        }

        if self.stacked_min_agreement < 2 {
            return Err(ScoringError::config("stacked_min_agreement must be at least 2"));
        }
        if self.stacked_min_agreement > self.stacked_window_size {
            return Err(ScoringError::config(format!(
                "stacked_min_agreement ({}) cannot exceed stacked_window_size ({})",
                self.stacked_min_agreement, self.stacked_window_size
            )));
        }
        if self.stacked_window_size > self.history_capacity {
            return Err(ScoringError::config(format!(
                "stacked_window_size ({}) cannot exceed history_capacity ({})",
                self.stacked_window_size, self.history_capacity
            )));
        }

        if !(self.breakout_near_tolerance_pct.is_finite() && self.breakout_near_tolerance_pct >= 0.0) {
            return Err(ScoringError::config(format!(
                "breakout_near_tolerance_pct must be non-negative, got {}",
                self.breakout_near_tolerance_pct
            )));
        }

        let strength = &self.breakout_strength_thresholds;
        positive("breakout_strength_thresholds.moderate", strength.moderate)?;
        positive("breakout_strength_thresholds.strong", strength.strong)?;
        if strength.moderate >= strength.strong {
            return Err(ScoringError::config(format!(
                "breakout strength tiers must increase: moderate {} < strong {}",
                strength.moderate, strength.strong
            )));
        }

        for (name, v) in [
            ("partial_range_penalty", self.partial_range_penalty),
            ("approximated_imbalance_penalty", self.approximated_imbalance_penalty),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(ScoringError::config(format!("{} must be in (0, 1], got {}", name, v)));
            }
        }

        Ok(())
    }

    /// Number of bars the opening window should hold at the given bar size.
    pub fn expected_range_bars(&self, interval: Interval) -> usize {
        let bar_minutes = interval.minutes().max(1);
        (self.reference_window_minutes as usize).div_ceil(bar_minutes as usize).max(1)
    }
}

/// Top-level runtime settings for the scanner binary and session replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub scoring: ScoringConfig,
    pub interval: Interval,
    pub session_open: NaiveTime,
    pub max_concurrent: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            interval: Interval::Minute,
            session_open: session_open_time(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl ScannerConfig {
    /// Defaults overridden by the `SCANNER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(minutes) = env_parse::<u32>("SCANNER_REFERENCE_WINDOW") {
            config.scoring.reference_window_minutes = minutes;
        }
        if let Some(threshold) = env_parse::<f64>("SCANNER_SPIKE_THRESHOLD") {
            config.scoring.spike_threshold = threshold;
        }
        if let Some(interval) = std::env::var("SCANNER_INTERVAL").ok().and_then(|v| Interval::from_wire(&v)) {
            config.interval = interval;
        }
        if let Some(flag) = std::env::var("SCANNER_APPROXIMATE_IMBALANCE").ok().and_then(|v| parse_flag(&v)) {
            config.scoring.approximate_missing_imbalance = flag;
        }
        config.max_concurrent = get_max_concurrent();

        config
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.max_concurrent == 0 {
            return Err(ScoringError::config("max_concurrent must be at least 1"));
        }
        self.scoring.validate()
    }

    pub fn reference_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.scoring.reference_window_minutes as i64)
    }
}

pub fn session_open_time() -> NaiveTime {
    NaiveTime::from_hms_opt(SESSION_OPEN_HOUR, SESSION_OPEN_MINUTE, 0).unwrap_or(NaiveTime::MIN)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Boolean env value; anything unrecognised leaves the default in place.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// -----------------------------------------------
// RUNTIME CONFIGURATION
// -----------------------------------------------

/// Get the execution mode from environment or default to demo
pub fn get_execution_mode() -> String {
    std::env::var("SCANNER_MODE").unwrap_or_else(|_| "demo".to_string())
}

/// Symbols to scan, comma separated
pub fn get_symbols() -> Vec<String> {
    match std::env::var("SCANNER_SYMBOLS") {
        Ok(list) => list
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn get_broker_base_url() -> String {
    std::env::var("BROKER_API_BASE").unwrap_or_else(|_| BROKER_BASE_URL.to_string())
}

/// `api_key:access_token` pair for the broker, if both are set
pub fn get_broker_credentials() -> Option<(String, String)> {
    let key = std::env::var("BROKER_API_KEY").ok()?;
    let token = std::env::var("BROKER_ACCESS_TOKEN").ok()?;
    Some((key, token))
}

pub fn get_llm_settings() -> Option<(String, String, String)> {
    let key = std::env::var("LLM_API_KEY").ok()?;
    let base = std::env::var("LLM_API_BASE").unwrap_or_else(|_| LLM_BASE_URL.to_string());
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| LLM_DEFAULT_MODEL.to_string());
    Some((base, key, model))
}

/// Path of the JSON signal log
pub fn get_store_path() -> String {
    std::env::var("SCANNER_STORE").unwrap_or_else(|_| "signals.json".to_string())
}

/// Get concurrency limit, clamped to 1-50
pub fn get_max_concurrent() -> usize {
    if let Ok(val) = std::env::var("SCANNER_MAX_CONCURRENT") {
        if let Ok(num) = val.parse::<usize>() {
            return num.clamp(1, 50);
        }
    }
    DEFAULT_MAX_CONCURRENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ScannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_spike_threshold_rejected() {
        let config = ScoringConfig { spike_threshold: -1.0, ..ScoringConfig::default() };
        assert!(matches!(config.validate(), Err(ScoringError::Configuration(_))));
    }

    #[test]
    fn test_unordered_spike_tiers_rejected() {
        let config = ScoringConfig {
            volume_spike_thresholds: SpikeThresholds { extreme: 3.0, high: 3.5, moderate: 2.0 },
            ..ScoringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stack_window_bounds() {
        let config = ScoringConfig { stacked_min_agreement: 4, ..ScoringConfig::default() };
        assert!(config.validate().is_err());

        let config = ScoringConfig { stacked_window_size: 6, ..ScoringConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expected_range_bars() {
        let config = ScoringConfig::default();
        assert_eq!(config.expected_range_bars(Interval::Minute), 15);
        assert_eq!(config.expected_range_bars(Interval::FiveMinute), 3);
        assert_eq!(config.expected_range_bars(Interval::FifteenMinute), 1);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ScoringConfig = serde_json::from_str(r#"{"spike_threshold": 3.0}"#).unwrap();
        assert_eq!(config.spike_threshold, 3.0);
        assert_eq!(config.stacked_window_size, 3);
    }

    #[test]
    fn test_flag_values() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" 1 "), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("Off"), Some(false));
        assert_eq!(parse_flag(""), None);
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_quote_url_encodes_symbol() {
        assert_eq!(quote_url("https://x", "NSE", "M&M"), "https://x/quote?i=NSE%3AM%26M");
    }
}
