use crate::models::{Instrument, InstrumentKind};
use anyhow::{Context, Result};
use std::collections::HashMap;

// -----------------------------------------------
// DEFAULT NSE INSTRUMENT TOKENS
// -----------------------------------------------
const NSE_EQUITIES: &[(&str, u32)] = &[
    ("RELIANCE", 738561),
    ("TCS", 2953217),
    ("INFY", 408065),
    ("HDFCBANK", 341249),
    ("ICICIBANK", 1270529),
    ("SBIN", 779521),
    ("AXISBANK", 1510401),
    ("KOTAKBANK", 492033),
    ("ITC", 424961),
    ("LT", 2939649),
    ("BHARTIARTL", 2714625),
    ("HINDUNILVR", 356865),
    ("MARUTI", 2815745),
    ("TATAMOTORS", 884737),
    ("M&M", 519937),
];

const NSE_INDICES: &[(&str, u32)] = &[("NIFTY 50", 256265), ("NIFTY BANK", 260105)];

/// Symbol to instrument lookup. Built once and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    by_symbol: HashMap<String, Instrument>,
}

impl InstrumentCatalog {
    pub fn new(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        let by_symbol = instruments
            .into_iter()
            .map(|i| (i.symbol.to_uppercase(), i))
            .collect();
        Self { by_symbol }
    }

    /// Built-in table of liquid NSE names and the two headline indices.
    pub fn nse_default() -> Self {
        let equities = NSE_EQUITIES.iter().map(|(s, t)| Instrument::equity(*s, *t));
        let indices = NSE_INDICES.iter().map(|(s, t)| Instrument::index(*s, *t));
        Self::new(equities.chain(indices))
    }

    /// Load from a JSON array of instruments.
    pub fn from_json(text: &str) -> Result<Self> {
        let instruments: Vec<Instrument> = serde_json::from_str(text).context("Failed to parse instrument catalog")?;
        Ok(Self::new(instruments))
    }

    pub fn lookup(&self, symbol: &str) -> Option<&Instrument> {
        self.by_symbol.get(&symbol.trim().to_uppercase())
    }

    pub fn token(&self, symbol: &str) -> Option<u32> {
        self.lookup(symbol).map(|i| i.token)
    }

    /// Split requested symbols into known instruments and unknown names.
    pub fn resolve<S: AsRef<str>>(&self, symbols: &[S]) -> (Vec<Instrument>, Vec<String>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for symbol in symbols {
            match self.lookup(symbol.as_ref()) {
                Some(instrument) => found.push(instrument.clone()),
                None => missing.push(symbol.as_ref().to_string()),
            }
        }
        (found, missing)
    }

    pub fn equities(&self) -> impl Iterator<Item = &Instrument> {
        self.by_symbol.values().filter(|i| i.kind == InstrumentKind::Equity)
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lookup_is_case_insensitive() {
        let catalog = InstrumentCatalog::nse_default();
        assert_eq!(catalog.token("reliance"), Some(738561));
        assert_eq!(catalog.lookup("NIFTY 50").unwrap().kind, InstrumentKind::Index);
    }

    #[test]
    fn test_resolve_splits_unknown() {
        let catalog = InstrumentCatalog::nse_default();
        let (found, missing) = catalog.resolve(&["TCS", "NOTASTOCK"]);
        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["NOTASTOCK".to_string()]);
    }

    #[test]
    fn test_from_json() {
        let text = r#"[{"symbol":"ABC","token":1,"exchange":"NSE","kind":"Equity"}]"#;
        let catalog = InstrumentCatalog::from_json(text).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.token("abc"), Some(1));
    }
}
