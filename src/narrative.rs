use crate::config;
use crate::imbalance::StackState;
use crate::models::ScoredBar;
use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::future::Future;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Bump whenever the reply grammar below changes.
pub const PARSER_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NarrativeSignal {
    Buy,
    Sell,
    NoSignal,
}

/// Fields pulled out of a free-text model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub signal: NarrativeSignal,
    pub confidence: Option<f64>,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target: Option<f64>,
    pub parser_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrativeVerdict {
    Parsed(Narrative),
    Unparseable { excerpt: String, parser_version: u32 },
}

impl NarrativeVerdict {
    /// Unparseable replies count as no signal.
    pub fn signal(&self) -> NarrativeSignal {
        match self {
            NarrativeVerdict::Parsed(n) => n.signal,
            NarrativeVerdict::Unparseable { .. } => NarrativeSignal::NoSignal,
        }
    }
}

/// Deterministic prompt for one scored bar. Same bar, same text.
pub fn build_prompt(scored: &ScoredBar) -> String {
    let bar = &scored.candle;
    let signal = &scored.signal;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "You are reviewing an NSE intraday opening-range breakout setup.");
    let _ = writeln!(prompt, "Symbol: {}", scored.symbol);
    let _ = writeln!(prompt, "Bar time: {}", bar.timestamp.to_rfc3339());
    let _ = writeln!(
        prompt,
        "Bar: open {:.2}, high {:.2}, low {:.2}, close {:.2}, volume {:.0}",
        bar.open, bar.high, bar.low, bar.close, bar.volume
    );

    match &signal.breakout {
        Some(b) => {
            let _ = writeln!(
                prompt,
                "Breakout: {:?} at {:.2} against boundary {:.2} ({:.2}%)",
                b.direction, b.price, b.boundary, b.strength_pct
            );
        }
        None => {
            let _ = writeln!(prompt, "Breakout: reference range unavailable");
        }
    }
    match &signal.volume_spike {
        Some(v) => {
            let _ = writeln!(
                prompt,
                "Volume: {:.2}x baseline {:.0} ({})",
                v.ratio,
                v.baseline,
                v.level.label()
            );
        }
        None => {
            let _ = writeln!(prompt, "Volume: baseline unavailable");
        }
    }
    let imbalance = match &signal.imbalance {
        StackState::Stacked(s) => format!(
            "{} of last {} readings {} (mean magnitude {:.2})",
            s.count,
            s.window,
            s.direction.label(),
            s.mean_magnitude
        ),
        StackState::NotStacked { readings } => format!("not stacked over {} readings", readings),
        StackState::Unavailable { readings } => format!("unavailable ({} readings)", readings),
    };
    let _ = writeln!(prompt, "Order imbalance: {}", imbalance);
    let _ = writeln!(
        prompt,
        "Rule-based verdict: {} (confidence {:.1})",
        signal.action.as_str(),
        signal.confidence
    );
    let _ = writeln!(prompt, "Reasoning: {}", signal.reasoning);
    prompt.push('\n');
    prompt.push_str(
        "Reply in exactly this format:\n\
         SIGNAL: BUY | SELL | NO_SIGNAL\n\
         CONFIDENCE: <0-100>\n\
         ENTRY: <price>\n\
         STOP LOSS: <price>\n\
         TARGET: <price>\n",
    );
    prompt
}

struct ReplyGrammar {
    signal: Regex,
    confidence: Regex,
    entry: Regex,
    stop_loss: Regex,
    target: Regex,
}

impl ReplyGrammar {
    fn compile() -> Result<Self, regex::Error> {
        let number = r"[:\-\s]*(?:Rs\.?|INR|₹)?\s*([0-9][0-9,]*(?:\.[0-9]+)?)";
        Ok(Self {
            signal: Regex::new(r"(?im)^\W*SIGNAL\W*[:\-]\s*\W*(BUY|SELL|NO[_\s]?SIGNAL|HOLD)\b")?,
            confidence: Regex::new(&format!(r"(?im)^\W*CONFIDENCE\W*{}", number))?,
            entry: Regex::new(&format!(r"(?im)^\W*ENTRY(?:\s+PRICE)?\W*{}", number))?,
            stop_loss: Regex::new(&format!(r"(?im)^\W*STOP[\s_-]?LOSS\W*{}", number))?,
            target: Regex::new(&format!(r"(?im)^\W*TARGET(?:\s+PRICE)?\W*{}", number))?,
        })
    }

    fn number(re: &Regex, text: &str) -> Option<f64> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

static GRAMMAR: LazyLock<Result<ReplyGrammar, regex::Error>> = LazyLock::new(ReplyGrammar::compile);

fn unparseable(text: &str) -> NarrativeVerdict {
    NarrativeVerdict::Unparseable {
        excerpt: text.chars().take(120).collect(),
        parser_version: PARSER_VERSION,
    }
}

/// Pull the structured fields out of a model reply. A reply without a
/// recognisable SIGNAL line is unparseable.
pub fn parse_reply(text: &str) -> NarrativeVerdict {
    let grammar = match GRAMMAR.as_ref() {
        Ok(g) => g,
        Err(e) => {
            warn!(error = %e, "reply grammar failed to compile");
            return unparseable(text);
        }
    };

    let Some(raw_signal) = grammar.signal.captures(text).and_then(|c| c.get(1)) else {
        return unparseable(text);
    };
    let signal = match raw_signal.as_str().to_uppercase().as_str() {
        "BUY" => NarrativeSignal::Buy,
        "SELL" => NarrativeSignal::Sell,
        _ => NarrativeSignal::NoSignal,
    };

    NarrativeVerdict::Parsed(Narrative {
        signal,
        confidence: ReplyGrammar::number(&grammar.confidence, text).map(|c| c.clamp(0.0, 100.0)),
        entry: ReplyGrammar::number(&grammar.entry, text),
        stop_loss: ReplyGrammar::number(&grammar.stop_loss, text),
        target: ReplyGrammar::number(&grammar.target, text),
        parser_version: PARSER_VERSION,
    })
}

/// Anything that turns a prompt into free text.
pub trait NarrativeProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Ask the provider about one bar and parse what comes back.
pub async fn narrate<P: NarrativeProvider>(provider: &P, scored: &ScoredBar) -> Result<NarrativeVerdict> {
    let prompt = build_prompt(scored);
    let reply = provider.complete(&prompt).await?;
    let verdict = parse_reply(&reply);
    debug!(symbol = %scored.symbol, signal = ?verdict.signal(), "narrative parsed");
    Ok(verdict)
}

// -----------------------------------------------
// OPENAI-STYLE CHAT COMPLETIONS
// -----------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::USER_AGENT)
            .timeout(config::LLM_HTTP_TIMEOUT)
            .build()
            .context("Failed to build LLM client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Built from `LLM_API_KEY` and friends, `None` when no key is set.
    pub fn from_env() -> Option<Result<Self>> {
        config::get_llm_settings().map(|(base, key, model)| Self::new(&base, key, model))
    }
}

impl NarrativeProvider for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens: config::LLM_MAX_TOKENS,
            temperature: 0.0,
        };

        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("LLM request failed")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            anyhow::bail!("LLM error {}: {}", status, preview);
        }

        let body: ChatResponse = res.json().await.context("Malformed LLM response")?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("LLM response had no content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, parse_timestamp};
    use crate::scorer::Signal;

    fn scored() -> ScoredBar {
        let ts = parse_timestamp("2025-01-06T10:00:00+05:30").unwrap();
        ScoredBar {
            symbol: "RELIANCE".to_string(),
            candle: Candle::new(ts, 866.0, 875.0, 865.0, 874.0, 480_000.0),
            signal: Signal::no_signal("reference range unavailable"),
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let bar = scored();
        assert_eq!(build_prompt(&bar), build_prompt(&bar));
        assert!(build_prompt(&bar).contains("Symbol: RELIANCE"));
    }

    #[test]
    fn test_parse_full_reply() {
        let reply = "Analysis done.\nSIGNAL: BUY\nCONFIDENCE: 78%\nENTRY: ₹1,234.50\nSTOP LOSS: 1220\n**Target**: 1260.25\n";
        match parse_reply(reply) {
            NarrativeVerdict::Parsed(n) => {
                assert_eq!(n.signal, NarrativeSignal::Buy);
                assert_eq!(n.confidence, Some(78.0));
                assert_eq!(n.entry, Some(1234.5));
                assert_eq!(n.stop_loss, Some(1220.0));
                assert_eq!(n.target, Some(1260.25));
                assert_eq!(n.parser_version, PARSER_VERSION);
            }
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_no_signal_variants() {
        assert_eq!(parse_reply("SIGNAL: NO_SIGNAL").signal(), NarrativeSignal::NoSignal);
        assert_eq!(parse_reply("signal - hold").signal(), NarrativeSignal::NoSignal);
    }

    #[test]
    fn test_unparseable_reply_maps_to_no_signal() {
        let verdict = parse_reply("The stock looks interesting but I am not sure.");
        assert!(matches!(verdict, NarrativeVerdict::Unparseable { .. }));
        assert_eq!(verdict.signal(), NarrativeSignal::NoSignal);
    }

    struct Canned(&'static str);

    impl NarrativeProvider for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_narrate_uses_provider_reply() {
        let verdict = narrate(&Canned("SIGNAL: SELL\nCONFIDENCE: 61"), &scored()).await.unwrap();
        assert_eq!(verdict.signal(), NarrativeSignal::Sell);
    }
}
