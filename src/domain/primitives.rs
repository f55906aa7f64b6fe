//! Domain primitives: TimeMs, UserId, Symbol, Side.

use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time in milliseconds.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Subtract a duration in milliseconds, saturating at zero.
    pub fn saturating_sub_ms(&self, ms: i64) -> Self {
        TimeMs(self.0.saturating_sub(ms).max(0))
    }
}

/// Identifier of the account whose ledger is being reconciled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange trading pair symbol (canonical uppercase, e.g. "BTCUSDT").
///
/// Comparison is case-sensitive on purpose: exchange symbols are canonical
/// and a lowercase variant is a data defect, not an alias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Symbol(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strip a quote-asset suffix, returning the base asset if a suffix matches.
    /// The longest matching suffix wins.
    pub fn base_asset<'a>(&'a self, quote_suffixes: &[String]) -> Option<&'a str> {
        let mut best: Option<&str> = None;
        for quote in quote_suffixes {
            if let Some(base) = self.0.strip_suffix(quote.as_str()) {
                if !base.is_empty() && best.map_or(true, |b| base.len() < b.len()) {
                    best = Some(base);
                }
            }
        }
        best
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade side: Buy or Sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Parse a side from its canonical lowercase form; exchange-style
    /// capitalized forms ("Buy"/"Sell") are accepted at the gateway boundary.
    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "buy" | "Buy" => Some(Side::Buy),
            "sell" | "Sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
