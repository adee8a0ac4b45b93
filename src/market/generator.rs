//! Day-path generation.
//!
//! Each trading day every symbol gets a full 1440-slot price path generated
//! up front: geometric Brownian motion steps plus a handful of pre-allocated
//! jump slots. Paths are reproducible for a given (symbol, date, seed), which
//! supports audit/replay and mid-day restarts.

use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use super::clock::SLOTS_PER_DAY;
use crate::types::{Symbol, VolatilityClass};

/// Jump slots stay clear of the first and last minutes of the day.
const JUMP_SLOT_MIN: usize = 10;
const JUMP_SLOT_MAX: usize = 1430;

const PRICE_FLOOR: f64 = 0.01;

/// Market-wide sentiment score for a day, 25..=74. Shared by all symbols;
/// shifts the drift of every path generated for that date.
pub fn sentiment(date: NaiveDate, seed: u64) -> u8 {
    let mut rng = StdRng::seed_from_u64(mix(seed, "sentiment", date));
    rng.gen_range(25..75)
}

/// Deterministic listing price for a symbol with no prior close, 5.00..300.00.
pub fn base_price(symbol: &Symbol, seed: u64) -> Decimal {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    symbol.code.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    round_price(rng.gen_range(5.0..300.0))
}

/// Generate the full price path for one symbol and date, starting from the
/// previous close. Reproducible for equal (symbol code, date, seed).
pub fn generate_day(
    symbol: &Symbol,
    date: NaiveDate,
    seed: u64,
    prev_close: Decimal,
) -> Vec<Decimal> {
    let mut rng = StdRng::seed_from_u64(mix(seed, &symbol.code, date));
    let sentiment = sentiment(date, seed) as f64;

    // Sentiment 25..74 maps to a daily drift of roughly -0.5%..+0.5%.
    let mu_day = (sentiment - 49.5) / 49.5 * 0.005;
    let sigma_day = symbol.daily_sigma;
    let dt = 1.0 / SLOTS_PER_DAY as f64;

    let jumps = allocate_jumps(&mut rng, symbol.volatility);

    let mut price = prev_close.to_f64().unwrap_or(PRICE_FLOOR).max(PRICE_FLOOR);
    let mut path = Vec::with_capacity(SLOTS_PER_DAY);

    for slot in 0..SLOTS_PER_DAY {
        let z = gaussian(&mut rng).clamp(-4.0, 4.0);
        let step = (mu_day - 0.5 * sigma_day * sigma_day) * dt + sigma_day * dt.sqrt() * z;
        price *= step.exp();

        if let Some(jump) = jumps.iter().find(|j| j.slot == slot) {
            price *= 1.0 + jump.magnitude;
        }

        price = price.max(PRICE_FLOOR);
        path.push(round_price(price));
    }

    path
}

struct Jump {
    slot: usize,
    magnitude: f64,
}

/// Pre-allocate the day's jumps: stable industries see 0-2, volatile 0-5.
/// Up jumps draw around a mean of +2..+4%, down jumps around -4..-2%, with
/// each jump's magnitude clamped to [1%, 5%].
fn allocate_jumps(rng: &mut StdRng, volatility: VolatilityClass) -> Vec<Jump> {
    let max_jumps = match volatility {
        VolatilityClass::Stable => 2,
        VolatilityClass::Volatile => 5,
    };
    let count = rng.gen_range(0..=max_jumps);

    // BTreeSet so iteration order (and thus magnitude assignment) is
    // deterministic for a given seed.
    let mut slots = BTreeSet::new();
    while slots.len() < count {
        slots.insert(rng.gen_range(JUMP_SLOT_MIN..=JUMP_SLOT_MAX));
    }

    slots
        .into_iter()
        .map(|slot| {
            let up = rng.gen_bool(0.5);
            let mean = if up {
                rng.gen_range(0.02..0.04)
            } else {
                rng.gen_range(-0.04..-0.02)
            };
            let raw = mean + gaussian(rng) * 0.01;
            let magnitude = raw.abs().clamp(0.01, 0.05) * raw.signum();
            Jump { slot, magnitude }
        })
        .collect()
}

/// Standard normal draw via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn round_price(price: f64) -> Decimal {
    Decimal::from_f64(price)
        .unwrap_or(dec!(0.01))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(dec!(0.01))
}

fn mix(seed: u64, tag: &str, date: NaiveDate) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    tag.hash(&mut hasher);
    date.num_days_from_ce().hash(&mut hasher);
    hasher.finish()
}
