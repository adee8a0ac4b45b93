//! Quote/tick store.
//!
//! Holds the in-flight trading day per symbol (the generated path plus a
//! publish cursor) and rolled-over daily history. The push loop is the only
//! writer; request handlers read snapshots.

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::clock;
use crate::types::{DailyCandle, Quote, Symbol, Tick};

/// One symbol's trading day: the pre-generated path and how much of it has
/// been published.
#[derive(Debug, Clone)]
pub struct DayBook {
    pub date: NaiveDate,
    pub prices: Vec<Decimal>,
    /// Number of slots published so far (0..=1440). The current price is
    /// `prices[published - 1]`, or `prev_close` before the first tick.
    pub published: usize,
    pub prev_close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

pub struct QuoteStore {
    symbols: DashMap<u64, Symbol>,
    by_code: DashMap<String, u64>,
    days: DashMap<u64, DayBook>,
    candles: DashMap<u64, Vec<DailyCandle>>,
    intraday: DashMap<(u64, NaiveDate), Vec<Decimal>>,
}

impl QuoteStore {
    pub fn new() -> Self {
        Self {
            symbols: DashMap::new(),
            by_code: DashMap::new(),
            days: DashMap::new(),
            candles: DashMap::new(),
            intraday: DashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------

    pub fn register_symbol(&self, symbol: Symbol) {
        self.by_code.insert(symbol.code.clone(), symbol.id);
        self.symbols.insert(symbol.id, symbol);
    }

    pub fn symbol(&self, id: u64) -> Option<Symbol> {
        self.symbols.get(&id).map(|s| s.clone())
    }

    pub fn symbol_by_code(&self, code: &str) -> Option<Symbol> {
        let id = *self.by_code.get(code)?;
        self.symbol(id)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut all: Vec<Symbol> = self.symbols.iter().map(|s| s.clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    // ------------------------------------------------------------------
    // Day lifecycle (single writer: the market push loop / admin ops)
    // ------------------------------------------------------------------

    /// Install a freshly generated day path. Any previous day is rolled into
    /// candle and intraday history first.
    pub fn load_day(&self, symbol_id: u64, date: NaiveDate, prices: Vec<Decimal>) {
        debug_assert_eq!(prices.len(), clock::SLOTS_PER_DAY);
        let prev_close = match self.days.remove(&symbol_id) {
            Some((_, old)) if old.date < date => {
                self.roll_over(symbol_id, &old);
                old.close()
            }
            Some((_, old)) => old.prev_close,
            None => prices[0],
        };

        debug!(symbol_id, %date, "loaded day path");
        self.days.insert(
            symbol_id,
            DayBook {
                date,
                prices,
                published: 0,
                prev_close,
                high: Decimal::ZERO,
                low: Decimal::ZERO,
            },
        );
    }

    fn roll_over(&self, symbol_id: u64, old: &DayBook) {
        if old.published == 0 {
            return;
        }
        let published = &old.prices[..old.published];
        let candle = DailyCandle {
            date: old.date,
            open: published[0],
            high: old.high,
            low: old.low,
            close: old.close(),
        };
        self.candles.entry(symbol_id).or_default().push(candle);
        self.intraday
            .insert((symbol_id, old.date), published.to_vec());
    }

    /// Publish ticks up to and including `slot`. Used both for the normal
    /// one-tick advance and to catch up after a mid-day restart.
    /// Returns the new quote when anything was published.
    pub fn publish_to(&self, symbol_id: u64, slot: usize) -> Option<Quote> {
        let mut book = self.days.get_mut(&symbol_id)?;
        let target = (slot + 1).min(clock::SLOTS_PER_DAY);
        if target <= book.published {
            return None;
        }
        for i in book.published..target {
            let price = book.prices[i];
            if book.published == 0 {
                book.high = price;
                book.low = price;
            } else {
                book.high = book.high.max(price);
                book.low = book.low.min(price);
            }
            book.published = i + 1;
        }
        drop(book);
        self.quote(symbol_id)
    }

    /// Date of the currently loaded day, if any.
    pub fn day_date(&self, symbol_id: u64) -> Option<NaiveDate> {
        self.days.get(&symbol_id).map(|b| b.date)
    }

    /// Last published slot index for any one symbol (they advance together).
    pub fn current_slot(&self) -> Option<usize> {
        self.days
            .iter()
            .filter(|b| b.published > 0)
            .map(|b| b.published - 1)
            .max()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn quote(&self, symbol_id: u64) -> Option<Quote> {
        let symbol = self.symbol(symbol_id)?;
        let book = self.days.get(&symbol_id)?;
        let (price, slot_index, open, high, low) = if book.published > 0 {
            (
                book.prices[book.published - 1],
                Some(book.published - 1),
                book.prices[0],
                book.high,
                book.low,
            )
        } else {
            let p = book.prev_close;
            (p, None, p, p, p)
        };

        let change_pct = if book.prev_close > Decimal::ZERO {
            ((price - book.prev_close) / book.prev_close * dec!(100))
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        } else {
            Decimal::ZERO
        };

        Some(Quote {
            symbol_id,
            code: symbol.code,
            price,
            open,
            high,
            low,
            prev_close: book.prev_close,
            slot_index,
            change_pct,
        })
    }

    pub fn quote_by_code(&self, code: &str) -> Option<Quote> {
        let id = *self.by_code.get(code)?;
        self.quote(id)
    }

    /// Current price shortcut; `None` when no day is loaded.
    pub fn price(&self, symbol_id: u64) -> Option<Decimal> {
        self.quote(symbol_id).map(|q| q.price)
    }

    /// Published ticks from `from_slot` (inclusive) to the current slot.
    pub fn ticks_since(&self, symbol_id: u64, from_slot: usize) -> Vec<Tick> {
        let Some(book) = self.days.get(&symbol_id) else {
            return Vec::new();
        };
        if from_slot >= book.published {
            return Vec::new();
        }
        (from_slot..book.published)
            .map(|slot| Tick {
                slot,
                price: book.prices[slot],
                time: clock::slot_time(book.date, slot),
            })
            .collect()
    }

    /// Most recent daily candles, oldest first.
    pub fn daily_candles(&self, symbol_id: u64, limit: usize) -> Vec<DailyCandle> {
        self.candles
            .get(&symbol_id)
            .map(|c| {
                let skip = c.len().saturating_sub(limit);
                c[skip..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Full tick history for a past date, if retained.
    pub fn intraday(&self, symbol_id: u64, date: NaiveDate) -> Option<Vec<Tick>> {
        self.intraday.get(&(symbol_id, date)).map(|prices| {
            prices
                .iter()
                .enumerate()
                .map(|(slot, price)| Tick {
                    slot,
                    price: *price,
                    time: clock::slot_time(date, slot),
                })
                .collect()
        })
    }

    /// Top-N gainers and losers by percent change vs previous close.
    pub fn movers(&self, n: usize) -> (Vec<Quote>, Vec<Quote>) {
        let mut quotes: Vec<Quote> = self
            .symbols
            .iter()
            .filter_map(|s| self.quote(*s.key()))
            .collect();
        quotes.sort_by(|a, b| b.change_pct.cmp(&a.change_pct));

        let gainers = quotes.iter().take(n).cloned().collect();
        let losers = quotes.iter().rev().take(n).cloned().collect();
        (gainers, losers)
    }

    /// Market value of a holding at current prices.
    pub fn market_value(&self, symbol_id: u64, quantity: Decimal) -> Decimal {
        self.price(symbol_id).unwrap_or(Decimal::ZERO) * quantity
    }

    /// Last tick time of the loaded day, for expiry checks.
    pub fn last_tick_time(&self, symbol_id: u64) -> Option<NaiveDateTime> {
        let book = self.days.get(&symbol_id)?;
        if book.published == 0 {
            return None;
        }
        Some(clock::slot_time(book.date, book.published - 1))
    }
}

impl DayBook {
    fn close(&self) -> Decimal {
        if self.published > 0 {
            self.prices[self.published - 1]
        } else {
            self.prev_close
        }
    }
}

impl Default for QuoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SymbolKind, VolatilityClass};

    fn store_with_symbol() -> QuoteStore {
        let store = QuoteStore::new();
        store.register_symbol(Symbol {
            id: 1,
            code: "AAPL".to_string(),
            name: "Apple".to_string(),
            kind: SymbolKind::Stock,
            industry: Some("tech".to_string()),
            volatility: VolatilityClass::Stable,
            daily_sigma: 0.02,
        });
        store
    }

    fn flat_day(price: Decimal) -> Vec<Decimal> {
        vec![price; clock::SLOTS_PER_DAY]
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    #[test]
    fn test_quote_before_first_tick_uses_prev_close() {
        let store = store_with_symbol();
        store.load_day(1, date(), flat_day(dec!(10)));

        let quote = store.quote(1).unwrap();
        assert_eq!(quote.slot_index, None);
        assert_eq!(quote.price, dec!(10));
    }

    #[test]
    fn test_publish_advances_monotonically() {
        let store = store_with_symbol();
        let mut prices = flat_day(dec!(10));
        prices[0] = dec!(9);
        prices[1] = dec!(11);
        prices[2] = dec!(8);
        store.load_day(1, date(), prices);

        store.publish_to(1, 0);
        assert_eq!(store.quote(1).unwrap().slot_index, Some(0));

        // re-publishing an old slot is a no-op
        assert!(store.publish_to(1, 0).is_none());

        let quote = store.publish_to(1, 2).unwrap();
        assert_eq!(quote.slot_index, Some(2));
        assert_eq!(quote.high, dec!(11));
        assert_eq!(quote.low, dec!(8));
        assert_eq!(quote.open, dec!(9));
    }

    #[test]
    fn test_ticks_since() {
        let store = store_with_symbol();
        store.load_day(1, date(), flat_day(dec!(10)));
        store.publish_to(1, 9);

        assert_eq!(store.ticks_since(1, 0).len(), 10);
        assert_eq!(store.ticks_since(1, 5).len(), 5);
        assert!(store.ticks_since(1, 10).is_empty());
    }

    #[test]
    fn test_rollover_records_history() {
        let store = store_with_symbol();
        store.load_day(1, date(), flat_day(dec!(10)));
        store.publish_to(1, clock::SLOTS_PER_DAY - 1);

        let next = clock::next_trading_day(date());
        store.load_day(1, next, flat_day(dec!(12)));

        let candles = store.daily_candles(1, 10);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(10));
        assert_eq!(store.quote(1).unwrap().prev_close, dec!(10));
        assert!(store.intraday(1, date()).is_some());
    }

    #[test]
    fn test_movers_ordering() {
        let store = store_with_symbol();
        store.register_symbol(Symbol {
            id: 2,
            code: "MSFT".to_string(),
            name: "Microsoft".to_string(),
            kind: SymbolKind::Stock,
            industry: None,
            volatility: VolatilityClass::Stable,
            daily_sigma: 0.02,
        });

        // Prior day at 10.00 for both, then AAPL opens +10%, MSFT -10%.
        let prior = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        store.load_day(1, prior, flat_day(dec!(10)));
        store.publish_to(1, clock::SLOTS_PER_DAY - 1);
        store.load_day(2, prior, flat_day(dec!(10)));
        store.publish_to(2, clock::SLOTS_PER_DAY - 1);
        store.load_day(1, date(), flat_day(dec!(11)));
        store.load_day(2, date(), flat_day(dec!(9)));
        store.publish_to(1, 0);
        store.publish_to(2, 0);

        let (gainers, losers) = store.movers(1);
        assert_eq!(gainers[0].code, "AAPL");
        assert_eq!(losers[0].code, "MSFT");
    }
}
