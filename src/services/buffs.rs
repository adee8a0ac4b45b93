//! Daily reward draws.
//!
//! Each user gets one draw per calendar day. Rarity is weighted
//! (COMMON 60 / RARE 30 / EPIC 9 / LEGENDARY 1); cash and stock rewards are
//! applied immediately, discount coupons are held until spent on a market
//! buy and lapse at midnight.

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use super::{AccountService, SettlementService};
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::market::QuoteStore;
use crate::types::{
    AssetChangeReason, Buff, BuffKind, PositionChangeEvent, Rarity, SymbolKind,
};
use rust_decimal::Decimal;

const RARITY_WEIGHTS: [(Rarity, u32); 4] = [
    (Rarity::Common, 60),
    (Rarity::Rare, 30),
    (Rarity::Epic, 9),
    (Rarity::Legendary, 1),
];

fn kinds_for(rarity: Rarity) -> [BuffKind; 3] {
    match rarity {
        Rarity::Common => [BuffKind::Discount95, BuffKind::Cash5000, BuffKind::Stock100],
        Rarity::Rare => [BuffKind::Discount90, BuffKind::Cash10000, BuffKind::Stock300],
        Rarity::Epic => [BuffKind::Discount85, BuffKind::Cash20000, BuffKind::Stock500],
        Rarity::Legendary => [
            BuffKind::Discount80,
            BuffKind::Cash50000,
            BuffKind::Stock1000,
        ],
    }
}

pub struct BuffService {
    accounts: Arc<AccountService>,
    store: Arc<QuoteStore>,
    settlements: Arc<SettlementService>,
    events: Arc<EventBus>,
    buffs: DashMap<u64, Buff>,
    /// (user, date) -> buff id; enforces one draw per day.
    draws: DashMap<(u64, NaiveDate), u64>,
    next_id: AtomicU64,
}

impl BuffService {
    pub fn new(
        accounts: Arc<AccountService>,
        store: Arc<QuoteStore>,
        settlements: Arc<SettlementService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            accounts,
            store,
            settlements,
            events,
            buffs: DashMap::new(),
            draws: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Perform today's draw for a user and apply any instant reward.
    pub async fn draw(&self, user_id: u64, now: NaiveDateTime) -> Result<Buff> {
        let today = now.date();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        // Claim today's slot up front; concurrent draws race on this single
        // insert and only the winner proceeds.
        match self.draws.entry((user_id, today)) {
            Entry::Occupied(_) => {
                return Err(EngineError::Validation("already drawn today".into()));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        match self.apply_draw(user_id, id, today).await {
            Ok(buff) => Ok(buff),
            Err(e) => {
                // Release the slot so a failed draw can be retried.
                self.draws.remove(&(user_id, today));
                Err(e)
            }
        }
    }

    async fn apply_draw(&self, user_id: u64, id: u64, today: NaiveDate) -> Result<Buff> {
        let (rarity, kind, stock_pick) = {
            let mut rng = rand::thread_rng();
            let rarity = roll_rarity(rng.gen_range(0..total_weight()));
            let kinds = kinds_for(rarity);
            let kind = kinds[rng.gen_range(0..kinds.len())];
            // Pick the granted symbol up front so the rng is not held
            // across the await below.
            let stock_pick = if kind.stock_quantity().is_some() {
                let stocks: Vec<_> = self
                    .store
                    .symbols()
                    .into_iter()
                    .filter(|s| s.kind == SymbolKind::Stock)
                    .collect();
                if stocks.is_empty() {
                    None
                } else {
                    Some(stocks[rng.gen_range(0..stocks.len())].clone())
                }
            } else {
                None
            };
            (rarity, kind, stock_pick)
        };

        let mut buff = Buff {
            id,
            user_id,
            date: today,
            kind,
            rarity,
            extra: None,
            // discounts lapse at midnight; instant rewards are marked used
            used: false,
            expires_at: (today + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap(),
        };

        let lock = self.accounts.lock(user_id);
        let _guard = lock.lock().await;

        if let Some(amount) = kind.cash_amount() {
            self.accounts.modify(user_id, |a| {
                a.absorb_cash(amount);
            })?;
            buff.used = true;
            if let Ok(event) = self
                .settlements
                .build_asset_event(user_id, AssetChangeReason::BuffCash)
            {
                self.events.publish_asset(&event);
            }
        } else if let Some(quantity) = kind.stock_quantity() {
            let symbol = stock_pick
                .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("no stock symbols loaded")))?;
            let price = self.store.price(symbol.id).unwrap_or(Decimal::ZERO);
            self.accounts
                .add_to_position(user_id, symbol.id, quantity, price);
            buff.extra = Some(symbol.code.clone());
            buff.used = true;
            self.events.publish_position(&PositionChangeEvent {
                user_id,
                symbol_id: symbol.id,
                code: symbol.code.clone(),
                position: self.accounts.position(user_id, symbol.id),
            });
            if let Ok(event) = self
                .settlements
                .build_asset_event(user_id, AssetChangeReason::BuffStock)
            {
                self.events.publish_asset(&event);
            }
        }

        self.buffs.insert(id, buff.clone());
        info!(user_id, buff_id = id, kind = ?kind, rarity = ?rarity, "buff drawn");
        Ok(buff)
    }

    /// Discount rate of a spendable coupon. Validates ownership, freshness
    /// and kind without consuming it.
    pub fn discount_rate(&self, user_id: u64, buff_id: u64, now: NaiveDateTime) -> Result<Decimal> {
        let buff = self
            .buffs
            .get(&buff_id)
            .ok_or_else(|| EngineError::NotFound(format!("buff {}", buff_id)))?;
        if buff.user_id != user_id {
            return Err(EngineError::Forbidden);
        }
        if buff.used {
            return Err(EngineError::InvalidStateTransition("buff already used".into()));
        }
        if now >= buff.expires_at {
            return Err(EngineError::InvalidStateTransition("buff expired".into()));
        }
        buff.kind
            .discount_rate()
            .ok_or_else(|| EngineError::Validation("buff is not a discount".into()))
    }

    /// Consume a coupon after a successful fill.
    pub fn mark_used(&self, buff_id: u64) {
        if let Some(mut buff) = self.buffs.get_mut(&buff_id) {
            buff.used = true;
        }
    }

    /// Today's draw (if any) and the user's spendable discount coupons.
    pub fn today(&self, user_id: u64, now: NaiveDateTime) -> (Option<Buff>, Vec<Buff>) {
        let drawn = self
            .draws
            .get(&(user_id, now.date()))
            .and_then(|id| self.buffs.get(&id).map(|b| b.clone()));
        let mut usable: Vec<Buff> = self
            .buffs
            .iter()
            .filter(|b| {
                b.user_id == user_id
                    && !b.used
                    && b.expires_at > now
                    && b.kind.discount_rate().is_some()
            })
            .map(|b| b.clone())
            .collect();
        usable.sort_by_key(|b| b.id);
        (drawn, usable)
    }
}

fn total_weight() -> u32 {
    RARITY_WEIGHTS.iter().map(|(_, w)| w).sum()
}

fn roll_rarity(mut roll: u32) -> Rarity {
    for (rarity, weight) in RARITY_WEIGHTS {
        if roll < weight {
            return rarity;
        }
        roll -= weight;
    }
    Rarity::Common
}
