use crate::config;
use crate::models::{Candle, Instrument, Interval, OrderFlow, ist_offset, parse_timestamp};
use crate::session::BarInput;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

/// Time span and bar size to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct BarWindow {
    pub from: DateTime<FixedOffset>,
    pub to: DateTime<FixedOffset>,
    pub interval: Interval,
}

impl BarWindow {
    /// Full NSE cash session (09:15 to 15:30 IST) for one date.
    pub fn session(date: NaiveDate, interval: Interval) -> Self {
        let ist = ist_offset();
        let open = date.and_time(config::session_open_time());
        let from = ist.from_local_datetime(&open).single().unwrap_or_else(|| ist.from_utc_datetime(&open));
        Self {
            from,
            to: from + chrono::Duration::minutes(375),
            interval,
        }
    }

    pub fn bar_count(&self) -> usize {
        let minutes = (self.to - self.from).num_minutes().max(0) as u32;
        (minutes / self.interval.minutes()) as usize
    }
}

/// Anything that can hand back an ordered candle sequence.
pub trait BarSource: Send + Sync {
    fn fetch_bars(
        &self,
        instrument: &Instrument,
        window: &BarWindow,
    ) -> impl Future<Output = Result<Vec<Candle>>> + Send;
}

/// Current-instant book snapshot. History cannot be reconstructed from
/// this; callers record it at each bar close going forward.
pub trait OrderFlowSource: Send + Sync {
    fn fetch_order_flow(&self, instrument: &Instrument) -> impl Future<Output = Result<OrderFlow>> + Send;
}

// -----------------------------------------------
// MOCK SOURCE
// -----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    BreakoutUp,
    BreakoutDown,
    Quiet,
}

/// Deterministic scripted sessions for demos and tests.
#[derive(Debug, Clone)]
pub struct MockBarSource {
    scenarios: HashMap<String, Scenario>,
    default_scenario: Scenario,
}

const MOCK_OPENING_BARS: usize = 15;
const MOCK_EVENT_START: usize = 30;
const MOCK_EVENT_BARS: usize = 3;
const MOCK_PRESSURE_LEAD: usize = 3;
const MOCK_BASE_VOLUME: f64 = 100_000.0;
const MOCK_EVENT_VOLUME: f64 = 480_000.0;

impl Default for MockBarSource {
    fn default() -> Self {
        Self::new(Scenario::Quiet)
    }
}

impl MockBarSource {
    pub fn new(default_scenario: Scenario) -> Self {
        Self {
            scenarios: HashMap::new(),
            default_scenario,
        }
    }

    pub fn with_scenario(mut self, symbol: &str, scenario: Scenario) -> Self {
        self.scenarios.insert(symbol.to_uppercase(), scenario);
        self
    }

    pub fn scenario_for(&self, instrument: &Instrument) -> Scenario {
        self.scenarios
            .get(&instrument.symbol.to_uppercase())
            .copied()
            .unwrap_or(self.default_scenario)
    }

    fn base_price(instrument: &Instrument) -> f64 {
        100.0 + (instrument.token % 900) as f64
    }

    fn in_event(i: usize) -> bool {
        (MOCK_EVENT_START..MOCK_EVENT_START + MOCK_EVENT_BARS).contains(&i)
    }

    fn bar(&self, instrument: &Instrument, window: &BarWindow, i: usize) -> Candle {
        let base = Self::base_price(instrument);
        let scenario = self.scenario_for(instrument);

        let mid = if Self::in_event(i) && scenario != Scenario::Quiet {
            let push = 0.008 + 0.002 * (i - MOCK_EVENT_START) as f64;
            match scenario {
                Scenario::BreakoutUp => base * (1.0 + push),
                _ => base * (1.0 - push),
            }
        } else if i < MOCK_OPENING_BARS {
            base * (1.0 + 0.001 * ((i % 5) as f64 - 2.0))
        } else {
            base * (1.0 + 0.0005 * ((i % 4) as f64 - 1.5))
        };

        let volume = if Self::in_event(i) && scenario != Scenario::Quiet {
            MOCK_EVENT_VOLUME
        } else {
            MOCK_BASE_VOLUME + (i % 3) as f64 * 5_000.0
        };

        let timestamp = window.from + window.interval.duration() * i as i32;
        let round = |p: f64| (p * 20.0).round() / 20.0;
        Candle::new(
            timestamp,
            round(mid * 0.999),
            round(mid * 1.002),
            round(mid * 0.998),
            round(mid * 1.001),
            volume,
        )
    }

    fn flow(&self, instrument: &Instrument, bar: &Candle, i: usize, interval: Interval) -> OrderFlow {
        let pressured = (MOCK_EVENT_START - MOCK_PRESSURE_LEAD..MOCK_EVENT_START + MOCK_EVENT_BARS).contains(&i);
        let (buy, sell) = match (self.scenario_for(instrument), pressured) {
            (Scenario::BreakoutUp, true) => (70_000.0, 30_000.0),
            (Scenario::BreakoutDown, true) => (30_000.0, 70_000.0),
            _ => (50_000.0 + (i % 2) as f64 * 2_000.0, 50_000.0),
        };
        OrderFlow::new(bar.timestamp + interval.duration(), buy, sell)
    }

    /// Bars paired with the snapshot a live recorder would have captured
    /// at each bar close.
    pub fn recorded_session(&self, instrument: &Instrument, window: &BarWindow) -> Vec<BarInput> {
        (0..window.bar_count())
            .map(|i| {
                let candle = self.bar(instrument, window, i);
                let flow = self.flow(instrument, &candle, i, window.interval);
                BarInput::new(candle, Some(flow))
            })
            .collect()
    }
}

fn ist_today() -> NaiveDate {
    chrono::Utc::now().with_timezone(&ist_offset()).date_naive()
}

impl BarSource for MockBarSource {
    async fn fetch_bars(&self, instrument: &Instrument, window: &BarWindow) -> Result<Vec<Candle>> {
        Ok((0..window.bar_count()).map(|i| self.bar(instrument, window, i)).collect())
    }
}

impl OrderFlowSource for MockBarSource {
    async fn fetch_order_flow(&self, instrument: &Instrument) -> Result<OrderFlow> {
        let window = BarWindow::session(ist_today(), Interval::Minute);
        let i = MOCK_EVENT_START;
        let bar = self.bar(instrument, &window, i);
        Ok(self.flow(instrument, &bar, i, window.interval))
    }
}

// -----------------------------------------------
// BROKER REST SOURCE
// -----------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    candles: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    timestamp: Option<String>,
    buy_quantity: Option<f64>,
    sell_quantity: Option<f64>,
}

/// Kite-style broker REST adapter. Expects an already issued access token.
pub struct RestBarSource {
    client: Client,
    base_url: String,
}

impl RestBarSource {
    pub fn new(base_url: impl Into<String>, credentials: Option<(String, String)>) -> Result<Self> {
        Ok(Self {
            client: build_client(credentials)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// GET with retry on 429/5xx, fail fast on other client errors.
    async fn fetch_json(&self, url: &str) -> Result<String> {
        let backoff = ExponentialBackoff::from_millis(config::RETRY_BASE_DELAY_MS)
            .factor(config::RETRY_FACTOR)
            .max_delay(Duration::from_secs(config::RETRY_MAX_DELAY_SECS))
            .take(config::RETRY_MAX_ATTEMPTS);

        Retry::spawn(backoff, || async {
            let res = self.client.get(url).send().await.context("Request send failed")?;
            let status = res.status();

            if status.is_success() {
                let text = res.text().await.context("Failed to read body")?;
                let trimmed = text.trim();
                if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                    let preview: String = text.chars().take(200).collect();
                    anyhow::bail!("Non-JSON response: {}", preview);
                }
                Ok(text)
            } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(%status, url, "retryable broker response");
                anyhow::bail!("Retryable error: {}", status)
            } else {
                let body = res.text().await.unwrap_or_default();
                let preview: String = body.chars().take(200).collect();
                anyhow::bail!("Client error {}: {}", status, preview)
            }
        })
        .await
    }
}

impl BarSource for RestBarSource {
    async fn fetch_bars(&self, instrument: &Instrument, window: &BarWindow) -> Result<Vec<Candle>> {
        let fmt = "%Y-%m-%d %H:%M:%S";
        let url = config::historical_candles_url(
            &self.base_url,
            instrument.token,
            window.interval.wire_name(),
            &window.from.format(fmt).to_string(),
            &window.to.format(fmt).to_string(),
        );
        debug!(symbol = %instrument.symbol, %url, "fetching candles");
        let text = self.fetch_json(&url).await?;
        parse_candles(&text).with_context(|| format!("Failed to parse candles for {}", instrument.symbol))
    }
}

impl OrderFlowSource for RestBarSource {
    async fn fetch_order_flow(&self, instrument: &Instrument) -> Result<OrderFlow> {
        let url = config::quote_url(&self.base_url, &instrument.exchange, &instrument.symbol);
        let text = self.fetch_json(&url).await?;
        let key = format!("{}:{}", instrument.exchange, instrument.symbol);
        parse_quote(&text, &key)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
    if envelope.status != "success" {
        anyhow::bail!(
            "Broker returned status '{}': {}",
            envelope.status,
            envelope.message.unwrap_or_default()
        );
    }
    envelope.data.context("Broker response missing data")
}

/// Parse `{"status":"success","data":{"candles":[[ts,o,h,l,c,v],...]}}`.
pub fn parse_candles(text: &str) -> Result<Vec<Candle>> {
    let envelope: Envelope<HistoricalData> = serde_json::from_str(text).context("Malformed candle payload")?;
    let data = unwrap_envelope(envelope)?;

    data.candles
        .iter()
        .map(|row| {
            if row.len() < 6 {
                anyhow::bail!("Candle row has {} fields, expected at least 6", row.len());
            }
            let ts = row[0].as_str().context("Candle timestamp is not a string")?;
            let num = |i: usize| row[i].as_f64().with_context(|| format!("Candle field {} is not numeric", i));
            Ok(Candle::new(parse_timestamp(ts)?, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?))
        })
        .collect()
}

/// Pull buy/sell quantity for one `EXCHANGE:SYMBOL` key out of a quote payload.
pub fn parse_quote(text: &str, key: &str) -> Result<OrderFlow> {
    let envelope: Envelope<HashMap<String, QuoteData>> =
        serde_json::from_str(text).context("Malformed quote payload")?;
    let mut data = unwrap_envelope(envelope)?;
    let quote = data.remove(key).with_context(|| format!("Quote for {} missing", key))?;

    let timestamp = quote
        .timestamp
        .as_deref()
        .and_then(|raw| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
        .and_then(|naive| ist_offset().from_local_datetime(&naive).single())
        .unwrap_or_else(|| chrono::Utc::now().with_timezone(&ist_offset()));

    Ok(OrderFlow::new(
        timestamp,
        quote.buy_quantity.context("Quote missing buy_quantity")?,
        quote.sell_quantity.context("Quote missing sell_quantity")?,
    ))
}

fn build_client(credentials: Option<(String, String)>) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    headers.insert(
        "X-Kite-Version",
        header::HeaderValue::from_static(config::BROKER_API_VERSION),
    );
    if let Some((api_key, access_token)) = credentials {
        let value = format!("token {}:{}", api_key, access_token);
        let mut value = header::HeaderValue::from_str(&value).context("Invalid broker credentials")?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
    }

    Client::builder()
        .default_headers(headers)
        .user_agent(config::USER_AGENT)
        .timeout(config::HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

// -----------------------------------------------
// BATCH FETCH WITH CONCURRENCY CONTROL
// -----------------------------------------------

/// Fetch bars for many instruments, at most `max_concurrent` in flight.
/// Results come back in input order.
pub async fn fetch_universe<S>(
    source: Arc<S>,
    instruments: Vec<Instrument>,
    window: BarWindow,
    max_concurrent: usize,
) -> Vec<(Instrument, Result<Vec<Candle>>)>
where
    S: BarSource + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(instruments.len());

    for instrument in instruments {
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let window = window.clone();
        let task_instrument = instrument.clone();

        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| anyhow::anyhow!("Semaphore error: {}", e))?;
            source.fetch_bars(&task_instrument, &window).await
        });
        handles.push((instrument, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (instrument, handle) in handles {
        let result = match handle.await {
            Ok(res) => res,
            Err(e) => Err(anyhow::anyhow!("Task error: {}", e)),
        };
        results.push((instrument, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candles() {
        let text = r#"{"status":"success","data":{"candles":[
            ["2025-01-06T09:15:00+0530", 1000.0, 1005.5, 998.0, 1003.0, 12000],
            ["2025-01-06T09:16:00+0530", 1003.0, 1004.0, 1001.0, 1002.0, 8000, 0]
        ]}}"#;
        let candles = parse_candles(text).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, 1005.5);
        assert_eq!(candles[1].volume, 8000.0);
    }

    #[test]
    fn test_parse_candles_error_status() {
        let text = r#"{"status":"error","message":"Invalid token","data":null}"#;
        let err = parse_candles(text).unwrap_err();
        assert!(err.to_string().contains("Invalid token"));
    }

    #[test]
    fn test_parse_quote() {
        let text = r#"{"status":"success","data":{"NSE:INFY":{
            "timestamp":"2025-01-06 10:01:00","buy_quantity":120000,"sell_quantity":80000,"last_price":1890.5
        }}}"#;
        let flow = parse_quote(text, "NSE:INFY").unwrap();
        assert_eq!(flow.buy_quantity, 120000.0);
        assert_eq!(flow.timestamp, parse_timestamp("2025-01-06T10:01:00+05:30").unwrap());
    }

    #[test]
    fn test_session_window_bar_count() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(BarWindow::session(date, Interval::Minute).bar_count(), 375);
        assert_eq!(BarWindow::session(date, Interval::FiveMinute).bar_count(), 75);
    }

    #[tokio::test]
    async fn test_mock_source_is_deterministic() {
        let source = MockBarSource::new(Scenario::BreakoutUp);
        let instrument = Instrument::equity("TEST", 1234);
        let window = BarWindow::session(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(), Interval::Minute);
        let a = source.fetch_bars(&instrument, &window).await.unwrap();
        let b = source.fetch_bars(&instrument, &window).await.unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|c| c.validate().is_ok()));
    }

    #[tokio::test]
    async fn test_mock_order_flow_is_on_exchange_date() {
        let source = MockBarSource::new(Scenario::BreakoutUp);
        let before = ist_today();
        let flow = source.fetch_order_flow(&Instrument::equity("TEST", 1234)).await.unwrap();
        let after = ist_today();

        let flow_date = flow.timestamp.with_timezone(&ist_offset()).date_naive();
        assert!(flow_date == before || flow_date == after, "flow dated {}", flow_date);
        assert_eq!(flow.timestamp.offset().local_minus_utc(), 19_800);
    }

    #[tokio::test]
    async fn test_fetch_universe_preserves_order() {
        let source = Arc::new(MockBarSource::default());
        let instruments = vec![Instrument::equity("A", 1), Instrument::equity("B", 2), Instrument::equity("C", 3)];
        let window = BarWindow::session(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(), Interval::FiveMinute);
        let results = fetch_universe(source, instruments, window, 2).await;
        let symbols: Vec<&str> = results.iter().map(|(i, _)| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B", "C"]);
        assert!(results.iter().all(|(_, r)| r.as_ref().map(|c| c.len() == 75).unwrap_or(false)));
    }
}
