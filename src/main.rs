use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use colored::Colorize;
use futures::future::join_all;
use nse_orb_scanner::config::{self, ScannerConfig};
use nse_orb_scanner::data_source::{
    BarWindow, MockBarSource, OrderFlowSource, RestBarSource, Scenario, fetch_universe,
};
use nse_orb_scanner::models::{Instrument, ScoredBar, ist_offset};
use nse_orb_scanner::narrative::{self, ChatCompletionsClient, NarrativeVerdict};
use nse_orb_scanner::scorer::Action;
use nse_orb_scanner::session::{BarInput, InstrumentSession, SessionReport, scan_universe};
use nse_orb_scanner::store::{FileStore, KeyValueStore};
use nse_orb_scanner::{InstrumentCatalog, ScoringError, logging};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("{} logging disabled: {}", "⚠".yellow(), e);
    }

    println!("{}", "=".repeat(60).blue());
    println!("{}", "NSE Opening Range Breakout Scanner".green().bold());
    println!("{}", "=".repeat(60).blue());
    println!();

    // Bad thresholds stop the run here and nowhere else.
    let config = ScannerConfig::from_env();
    config.validate().context("Invalid scanner configuration")?;
    let config = Arc::new(config);

    let catalog = InstrumentCatalog::nse_default();
    let (instruments, unknown) = catalog.resolve(&config::get_symbols());
    for symbol in &unknown {
        println!("{} Unknown symbol skipped: {}", "✗".red(), symbol.yellow());
    }
    if instruments.is_empty() {
        anyhow::bail!("No known symbols to scan");
    }

    let mode = config::get_execution_mode();
    println!("{} Mode: {}", "ℹ".blue(), mode.cyan());
    println!(
        "{} Reference window: {} min, interval: {}, instruments: {}",
        "ℹ".blue(),
        config.scoring.reference_window_minutes,
        config.interval.wire_name(),
        instruments.len()
    );
    println!();

    let store = FileStore::open(config::get_store_path())?;
    let llm = match ChatCompletionsClient::from_env() {
        Some(Ok(client)) => Some(client),
        Some(Err(e)) => {
            warn!(error = %e, "narrative client unavailable");
            None
        }
        None => None,
    };

    match mode.as_str() {
        "live" => run_live(config, instruments, &store, llm.as_ref()).await,
        _ => run_demo(config, instruments, &store, llm.as_ref()).await,
    }
}

async fn run_demo(
    config: Arc<ScannerConfig>,
    instruments: Vec<Instrument>,
    store: &FileStore,
    llm: Option<&ChatCompletionsClient>,
) -> Result<()> {
    println!("{}", "Step 1: Generating scripted sessions...".cyan());
    let source = MockBarSource::new(Scenario::Quiet)
        .with_scenario("RELIANCE", Scenario::BreakoutUp)
        .with_scenario("SBIN", Scenario::BreakoutDown);
    let window = BarWindow::session(Utc::now().with_timezone(&ist_offset()).date_naive(), config.interval);

    let universe: HashMap<String, Vec<BarInput>> = instruments
        .iter()
        .map(|i| (i.symbol.clone(), source.recorded_session(i, &window)))
        .collect();
    println!("{} {} sessions of {} bars", "✓".green(), universe.len(), window.bar_count());
    println!();

    println!("{}", "Step 2: Scoring...".cyan());
    let start_time = std::time::Instant::now();
    let reports = scan_universe(&universe, Arc::clone(&config), &HashMap::new());
    let elapsed = start_time.elapsed();

    print_summary(&reports, elapsed);
    for report in &reports {
        let trades: Vec<&ScoredBar> = report.trades().collect();
        handle_trades(&trades, store, llm).await?;
    }

    println!("{}", "=".repeat(60).blue());
    println!("{}", "Done!".green().bold());
    println!("{}", "=".repeat(60).blue());
    Ok(())
}

async fn run_live(
    config: Arc<ScannerConfig>,
    instruments: Vec<Instrument>,
    store: &FileStore,
    llm: Option<&ChatCompletionsClient>,
) -> Result<()> {
    let source = Arc::new(RestBarSource::new(
        config::get_broker_base_url(),
        config::get_broker_credentials(),
    )?);
    let today = Utc::now().with_timezone(&ist_offset()).date_naive();
    let window = BarWindow::session(today, config.interval);

    let mut sessions: HashMap<String, (InstrumentSession, Option<DateTime<FixedOffset>>)> = instruments
        .iter()
        .map(|i| (i.symbol.clone(), (InstrumentSession::new(&i.symbol, Arc::clone(&config)), None)))
        .collect();

    println!("{}", "Polling broker for completed bars...".cyan());
    println!("{} Max concurrent requests: {}", "ℹ".blue(), config.max_concurrent);
    println!();

    let mut ticker = tokio::time::interval(config.interval.duration().to_std()?);
    loop {
        ticker.tick().await;
        let now = Utc::now().with_timezone(&ist_offset());
        if now >= window.to + config.interval.duration() {
            info!("session closed");
            break;
        }

        // snapshot pairs with the bar that just closed
        let flows = join_all(instruments.iter().map(|i| source.fetch_order_flow(i))).await;
        let mut flows: HashMap<String, _> = instruments
            .iter()
            .zip(flows)
            .filter_map(|(i, res)| match res {
                Ok(flow) => Some((i.symbol.clone(), flow)),
                Err(e) => {
                    warn!(symbol = %i.symbol, error = %e, "order flow fetch failed");
                    None
                }
            })
            .collect();

        let fetched = fetch_universe(Arc::clone(&source), instruments.clone(), window.clone(), config.max_concurrent).await;
        let mut trades = Vec::new();

        for (instrument, result) in fetched {
            let bars = match result {
                Ok(bars) => bars,
                Err(e) => {
                    println!("{} {} → {}", "✗".red(), instrument.symbol.yellow(), e.to_string().chars().take(80).collect::<String>());
                    continue;
                }
            };
            let Some((session, last_seen)) = sessions.get_mut(&instrument.symbol) else {
                continue;
            };

            let completed: Vec<_> = bars
                .into_iter()
                .filter(|b| b.timestamp + config.interval.duration() <= now)
                .filter(|b| last_seen.is_none_or(|seen| b.timestamp > seen))
                .collect();
            let newest = completed.last().map(|b| b.timestamp);

            for bar in &completed {
                let flow = if Some(bar.timestamp) == newest { flows.remove(&instrument.symbol) } else { None };
                match session.on_bar(bar, flow.as_ref()) {
                    Ok(scored) => {
                        info!(
                            symbol = %scored.symbol,
                            action = scored.signal.action.as_str(),
                            confidence = scored.signal.confidence,
                            "bar scored"
                        );
                        if scored.signal.is_trade() {
                            trades.push(scored);
                        }
                    }
                    Err(ScoringError::InsufficientData(_)) => {}
                    Err(e) => warn!(symbol = %instrument.symbol, error = %e, "bar rejected"),
                }
            }
            if newest.is_some() {
                *last_seen = newest;
            }
        }

        let trades: Vec<&ScoredBar> = trades.iter().collect();
        handle_trades(&trades, store, llm).await?;
    }

    Ok(())
}

/// Print, optionally narrate, then persist each BUY/SELL.
async fn handle_trades(trades: &[&ScoredBar], store: &FileStore, llm: Option<&ChatCompletionsClient>) -> Result<()> {
    for scored in trades {
        print_trade(scored);

        let verdict = match llm {
            Some(client) => match narrative::narrate(client, scored).await {
                Ok(verdict) => {
                    println!("    {} narrative: {:?}", "↳".blue(), verdict.signal());
                    Some(verdict)
                }
                Err(e) => {
                    warn!(symbol = %scored.symbol, error = %e, "narrative failed");
                    None
                }
            },
            None => None,
        };

        persist(store, scored, verdict.as_ref())?;
    }
    Ok(())
}

fn persist(store: &FileStore, scored: &ScoredBar, verdict: Option<&NarrativeVerdict>) -> Result<()> {
    let key = format!("{}@{}", scored.symbol, scored.candle.timestamp.to_rfc3339());
    let mut value = serde_json::to_value(scored).context("Failed to serialize scored bar")?;
    if let (Some(verdict), Some(object)) = (verdict, value.as_object_mut()) {
        object.insert("narrative".to_string(), serde_json::to_value(verdict)?);
    }
    store.put(&key, value)
}

fn print_trade(scored: &ScoredBar) {
    let action = match scored.signal.action {
        Action::Buy => scored.signal.action.as_str().green().bold(),
        Action::Sell => scored.signal.action.as_str().red().bold(),
        Action::Hold => scored.signal.action.as_str().normal(),
    };
    println!(
        "  {} {} {} @ {:.2} ({}) confidence {:.1}",
        "✓".green(),
        scored.symbol.yellow(),
        action,
        scored.candle.close,
        scored.candle.timestamp.format("%H:%M"),
        scored.signal.confidence
    );
    println!("    {}", scored.signal.reasoning.dimmed());
}

fn print_summary(reports: &[SessionReport], elapsed: std::time::Duration) {
    let scored: usize = reports.iter().map(|r| r.scored.len()).sum();
    let trades: usize = reports.iter().map(|r| r.trades().count()).sum();
    let rejected: usize = reports.iter().map(|r| r.rejected.len()).sum();

    println!();
    println!("{}", "=".repeat(60).blue());
    println!("{}", "Summary".cyan().bold());
    println!("{}", "=".repeat(60).blue());
    println!("{} Bars scored: {}", "✓".green(), scored);
    println!("{} Signals: {}", "✓".green(), trades);
    println!("{} Rejected bars: {}", "✗".red(), rejected);
    println!("{} Time taken: {:.3}s", "⏱".yellow(), elapsed.as_secs_f64());
    println!();

    for report in reports {
        let count = report.trades().count();
        let marker = if count > 0 { "●".green() } else { "○".normal() };
        println!(
            "  {} {} → {} scored, {} warm-up, {} signals",
            marker,
            report.symbol.yellow(),
            report.scored.len(),
            report.warmup_bars,
            count
        );
    }
    println!();
}
