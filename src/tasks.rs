//! Background loops and their runtime switches.
//!
//! Four loops run for the life of the process: the market push (10s cadence,
//! matching the tick slot width), the settlement sweep (1m), daily
//! housekeeping (1m; every job in it is idempotent), and the leaderboard
//! refresh (10m). The market push and settlement sweep can be paused at
//! runtime through the admin API.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::market::{clock, generator};
use crate::types::QuoteEvent;
use crate::AppState;

const SETTLEMENT_INTERVAL: Duration = Duration::from_secs(60);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);
const RANKING_INTERVAL: Duration = Duration::from_secs(600);
/// Bankruptcy scan cadence, in market-push ticks (6 ticks = 1 minute).
const BANKRUPTCY_CHECK_TICKS: u64 = 6;

/// Runtime switches for the background loops.
pub struct TaskControl {
    market_push_enabled: AtomicBool,
    settlement_enabled: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub market_push_enabled: bool,
    pub settlement_enabled: bool,
    pub current_slot: Option<usize>,
    pub connected_clients: usize,
}

impl TaskControl {
    pub fn new() -> Self {
        Self {
            market_push_enabled: AtomicBool::new(true),
            settlement_enabled: AtomicBool::new(true),
        }
    }

    pub fn market_push_enabled(&self) -> bool {
        self.market_push_enabled.load(Ordering::Relaxed)
    }

    pub fn set_market_push(&self, enabled: bool) {
        self.market_push_enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "market push toggled");
    }

    pub fn settlement_enabled(&self) -> bool {
        self.settlement_enabled.load(Ordering::Relaxed)
    }

    pub fn set_settlement(&self, enabled: bool) {
        self.settlement_enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "settlement sweep toggled");
    }

    pub fn status(&self, state: &AppState) -> TaskStatus {
        TaskStatus {
            market_push_enabled: self.market_push_enabled(),
            settlement_enabled: self.settlement_enabled(),
            current_slot: state.store.current_slot(),
            connected_clients: state.room_manager.client_count(),
        }
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Make sure every symbol has the given day's path loaded, generating it on
/// demand. Safe to call repeatedly.
pub fn ensure_day_loaded(state: &AppState, date: NaiveDate) {
    for symbol in state.store.symbols() {
        if state.store.day_date(symbol.id) == Some(date) {
            continue;
        }
        let prev_close = state
            .store
            .price(symbol.id)
            .unwrap_or_else(|| generator::base_price(&symbol, state.config.market_seed));
        let prices = generator::generate_day(&symbol, date, state.config.market_seed, prev_close);
        state.store.load_day(symbol.id, date, prices);
        debug!(code = %symbol.code, %date, "day path loaded");
    }
}

/// Advance every symbol to the slot for `now`, push quote events and run
/// trigger evaluation. Publishes nothing outside sessions. Also used by the
/// admin catch-up endpoint.
pub async fn push_tick(state: &AppState, now: NaiveDateTime) {
    if !clock::is_trading_day(now.date()) {
        return;
    }
    ensure_day_loaded(state, now.date());

    let Some(slot) = clock::effective_end_slot(now) else {
        return;
    };
    for symbol in state.store.symbols() {
        let Some(quote) = state.store.publish_to(symbol.id, slot) else {
            continue;
        };
        state.events.publish_quote(&QuoteEvent {
            quote: quote.clone(),
        });
        state
            .orders
            .evaluate_triggers(symbol.id, quote.price, now)
            .await;
    }
}

/// 10-second loop: advance the tick stream and evaluate limit orders.
pub fn spawn_market_push(state: AppState) {
    tokio::spawn(async move {
        let mut ticks: u64 = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(clock::TICK_SECONDS as u64)).await;
            if !state.tasks.market_push_enabled() {
                continue;
            }
            let now = chrono::Local::now().naive_local();
            push_tick(&state, now).await;

            ticks += 1;
            if ticks % BANKRUPTCY_CHECK_TICKS == 0 {
                let declared = state.margin.check_all(now).await;
                if declared > 0 {
                    warn!(declared, "bankruptcies declared this scan");
                }
            }
        }
    });
}

/// 1-minute loop: release matured T+1 settlement records.
pub fn spawn_settlement(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SETTLEMENT_INTERVAL).await;
            if !state.tasks.settlement_enabled() {
                continue;
            }
            let now = chrono::Local::now().naive_local();
            state.settlements.sweep(now).await;
        }
    });
}

/// 1-minute loop: expire stale day orders, charge margin interest, restore
/// bankrupt accounts, settle expired options. Every job is idempotent so the
/// cadence only bounds latency.
pub fn spawn_housekeeping(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HOUSEKEEPING_INTERVAL).await;
            let now = chrono::Local::now().naive_local();
            state.orders.expire_stale(now).await;
            state.margin.accrue_daily_interest(now).await;
            state.margin.restore_due(now).await;
            state.options.settle_expired(now).await;
        }
    });
}

/// 10-minute loop: rebuild the leaderboard snapshot.
pub fn spawn_ranking(state: AppState) {
    tokio::spawn(async move {
        loop {
            state.ranking.refresh();
            tokio::time::sleep(RANKING_INTERVAL).await;
        }
    });
}

/// Start all background loops.
pub fn spawn_all(state: &AppState) {
    spawn_market_push(state.clone());
    spawn_settlement(state.clone());
    spawn_housekeeping(state.clone());
    spawn_ranking(state.clone());
}
