use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument class. Crypto pairs trade around the clock and allow
/// fractional quantities; stocks are session-gated with whole-share lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Stock,
    Crypto,
}

/// Volatility class assigned per industry; parameterizes the day-path
/// generator (jump frequency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityClass {
    Stable,
    Volatile,
}

/// A tradable instrument. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub kind: SymbolKind,
    pub industry: Option<String>,
    pub volatility: VolatilityClass,
    /// Daily log-return volatility used by the generator and options pricer.
    pub daily_sigma: f64,
}

/// A single generated tick within a trading day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub slot: usize,
    pub price: Decimal,
    pub time: NaiveDateTime,
}

/// Latest market state for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol_id: u64,
    pub code: String,
    pub price: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub prev_close: Decimal,
    /// Last published slot index within the current day, if any tick has
    /// been published today.
    pub slot_index: Option<usize>,
    /// Percent change vs previous close, 2dp.
    pub change_pct: Decimal,
}

/// One day of trading history for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCandle {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}
