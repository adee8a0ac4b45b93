//! T+1 settlement of sell proceeds.
//!
//! Every SELL fill enqueues a record whose `settle_time` is the same time of
//! day on the next trading day. A periodic sweep releases matured records
//! through the margin repayment waterfall. The sweep is idempotent: a record
//! flips PENDING -> SETTLED exactly once under the owner's user lock.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::AccountService;
use crate::error::Result;
use crate::events::EventBus;
use crate::market::{clock, QuoteStore};
use crate::types::{AssetChangeEvent, AssetChangeReason, SettlementRecord, SettlementStatus};

pub struct SettlementService {
    accounts: Arc<AccountService>,
    store: Arc<QuoteStore>,
    events: Arc<EventBus>,
    records: DashMap<u64, SettlementRecord>,
    next_id: AtomicU64,
}

impl SettlementService {
    pub fn new(
        accounts: Arc<AccountService>,
        store: Arc<QuoteStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            accounts,
            store,
            events,
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue sell proceeds for T+1 release. Caller holds the user lock.
    pub fn enqueue(
        &self,
        user_id: u64,
        order_id: u64,
        amount: Decimal,
        trade_time: NaiveDateTime,
    ) -> SettlementRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = SettlementRecord {
            id,
            user_id,
            order_id,
            amount,
            status: SettlementStatus::Pending,
            trade_time,
            settle_time: clock::settle_time(trade_time),
            settled_at: None,
        };
        self.records.insert(id, record.clone());
        record
    }

    pub fn pending_for(&self, user_id: u64) -> Vec<SettlementRecord> {
        let mut pending: Vec<SettlementRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.status == SettlementStatus::Pending)
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.id);
        pending
    }

    /// Sum of not-yet-settled proceeds for a user.
    pub fn pending_total(&self, user_id: u64) -> Decimal {
        self.records
            .iter()
            .filter(|r| r.user_id == user_id && r.status == SettlementStatus::Pending)
            .map(|r| r.amount)
            .sum()
    }

    /// Drop all pending records for a user (bankruptcy liquidation).
    /// Caller holds the user lock.
    pub fn clear_pending(&self, user_id: u64) {
        self.records
            .retain(|_, r| !(r.user_id == user_id && r.status == SettlementStatus::Pending));
    }

    /// Release every record due at `now`. Returns the number settled.
    /// One user's failure never blocks the others.
    pub async fn sweep(&self, now: NaiveDateTime) -> usize {
        // Group due record ids by user so each user is locked once.
        let mut due: HashMap<u64, Vec<u64>> = HashMap::new();
        for record in self.records.iter() {
            if record.status == SettlementStatus::Pending && record.settle_time <= now {
                due.entry(record.user_id).or_default().push(record.id);
            }
        }

        let mut settled = 0;
        for (user_id, record_ids) in due {
            let lock = self.accounts.lock(user_id);
            let _guard = lock.lock().await;

            for record_id in record_ids {
                match self.settle_one(user_id, record_id, now) {
                    Ok(true) => settled += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(user_id, record_id, "settlement failed: {}", e);
                    }
                }
            }

            if let Ok(event) =
                self.build_asset_event(user_id, AssetChangeReason::SettlementCompleted)
            {
                self.events.publish_asset(&event);
            }
        }

        if settled > 0 {
            info!(settled, "settlement sweep released records");
        }
        settled
    }

    /// Settle a single record. Caller holds the user lock.
    fn settle_one(&self, user_id: u64, record_id: u64, now: NaiveDateTime) -> Result<bool> {
        // CAS on status makes re-sweeps no-ops.
        let amount = {
            let Some(mut record) = self.records.get_mut(&record_id) else {
                return Ok(false);
            };
            if record.status != SettlementStatus::Pending || record.settle_time > now {
                return Ok(false);
            }
            record.status = SettlementStatus::Settled;
            record.settled_at = Some(now);
            record.amount
        };

        self.accounts.modify(user_id, |account| {
            account.absorb_cash(amount);
        })?;
        Ok(true)
    }

    /// Full account snapshot for asset-change notifications. Centralized
    /// here because the pending-settlement component lives in this service.
    pub fn build_asset_event(
        &self,
        user_id: u64,
        reason: AssetChangeReason,
    ) -> Result<AssetChangeEvent> {
        let account = self.accounts.account(user_id)?;
        let position_market_value: Decimal = self
            .accounts
            .positions(user_id)
            .iter()
            .map(|p| self.store.market_value(p.symbol_id, p.quantity))
            .sum();
        let pending_settlement = self.pending_total(user_id);
        let total_assets = account.balance + account.frozen_balance + position_market_value
            + pending_settlement
            - account.margin_loan_principal
            - account.margin_interest_accrued;

        Ok(AssetChangeEvent {
            user_id,
            balance: account.balance,
            frozen_balance: account.frozen_balance,
            position_market_value,
            pending_settlement,
            margin_loan_principal: account.margin_loan_principal,
            margin_interest_accrued: account.margin_interest_accrued,
            total_assets,
            bankrupt: account.bankrupt,
            bankrupt_count: account.bankrupt_count,
            bankrupt_reset_date: account.bankrupt_reset_date,
            reason,
        })
    }
}
