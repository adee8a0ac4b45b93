//! Margin interest and bankruptcy handling.
//!
//! Leveraged buys borrow against the account; the loan accrues simple daily
//! interest on trading days. When an account's net assets fall to zero or
//! below it is declared bankrupt: everything is liquidated and the account is
//! restored to its starting balance on the next trading day.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::RwLock;
use tracing::{info, warn};

use super::{AccountService, OptionsService, OrderService, SettlementService};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::market::{clock, QuoteStore};
use crate::types::AssetChangeReason;

pub struct MarginService {
    config: Arc<Config>,
    accounts: Arc<AccountService>,
    #[allow(dead_code)]
    store: Arc<QuoteStore>,
    settlements: Arc<SettlementService>,
    orders: Arc<OrderService>,
    options: Arc<OptionsService>,
    events: Arc<EventBus>,
    /// Runtime-adjustable; boots from config.
    daily_rate: RwLock<Decimal>,
    /// Last date interest was charged, so restarts of the housekeeping
    /// loop never double-bill a day.
    last_accrual: RwLock<Option<NaiveDate>>,
}

impl MarginService {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<AccountService>,
        store: Arc<QuoteStore>,
        settlements: Arc<SettlementService>,
        orders: Arc<OrderService>,
        options: Arc<OptionsService>,
        events: Arc<EventBus>,
    ) -> Self {
        let daily_rate = RwLock::new(config.margin.daily_interest_rate);
        Self {
            config,
            accounts,
            store,
            settlements,
            orders,
            options,
            events,
            daily_rate,
            last_accrual: RwLock::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Interest
    // ------------------------------------------------------------------

    pub fn daily_rate(&self) -> Decimal {
        *self.daily_rate.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the daily interest rate. Must be in [0, 1].
    pub fn set_daily_rate(&self, rate: Decimal) -> Result<()> {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(EngineError::Validation(
                "daily interest rate must be between 0 and 1".into(),
            ));
        }
        *self.daily_rate.write().unwrap_or_else(|e| e.into_inner()) = rate;
        info!(%rate, "daily interest rate updated");
        Ok(())
    }

    /// Charge one day of interest to every account carrying a loan.
    /// At most once per trading day; weekends are free.
    pub async fn accrue_daily_interest(&self, now: NaiveDateTime) -> usize {
        let today = now.date();
        if !clock::is_trading_day(today) {
            return 0;
        }
        {
            let mut last = self.last_accrual.write().unwrap_or_else(|e| e.into_inner());
            if *last == Some(today) {
                return 0;
            }
            *last = Some(today);
        }

        let rate = self.daily_rate();
        let mut charged = 0;
        for user_id in self.accounts.user_ids() {
            let lock = self.accounts.lock(user_id);
            let _guard = lock.lock().await;

            let principal = match self.accounts.account(user_id) {
                Ok(a) if !a.bankrupt && a.margin_loan_principal > Decimal::ZERO => {
                    a.margin_loan_principal
                }
                _ => continue,
            };
            let interest = (principal * rate)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            if interest.is_zero() {
                continue;
            }
            if self
                .accounts
                .modify(user_id, |a| a.margin_interest_accrued += interest)
                .is_err()
            {
                continue;
            }
            charged += 1;

            if let Ok(event) = self
                .settlements
                .build_asset_event(user_id, AssetChangeReason::InterestAccrued)
            {
                self.events.publish_asset(&event);
            }
        }

        if charged > 0 {
            info!(charged, %rate, "accrued daily margin interest");
        }
        charged
    }

    // ------------------------------------------------------------------
    // Bankruptcy
    // ------------------------------------------------------------------

    /// Scan every account for insolvency. Returns the number declared
    /// bankrupt this pass.
    pub async fn check_all(&self, now: NaiveDateTime) -> usize {
        let mut declared = 0;
        for user_id in self.accounts.user_ids() {
            match self.check_user(user_id, now).await {
                Ok(true) => declared += 1,
                Ok(false) => {}
                Err(e) => warn!(user_id, "bankruptcy check failed: {}", e),
            }
        }
        declared
    }

    /// Declare a user bankrupt if net assets have fallen to zero or below.
    /// Liquidation drops positions, open orders, pending settlements and the
    /// loan; the account sits out until the next trading day.
    pub async fn check_user(&self, user_id: u64, now: NaiveDateTime) -> Result<bool> {
        let lock = self.accounts.lock(user_id);
        let _guard = lock.lock().await;

        let account = self.accounts.account(user_id)?;
        if account.bankrupt {
            return Ok(false);
        }
        let snapshot = self
            .settlements
            .build_asset_event(user_id, AssetChangeReason::Bankrupt)?;
        if snapshot.total_assets > Decimal::ZERO {
            return Ok(false);
        }

        let cancelled = self.orders.cancel_all_pending(user_id, now);
        self.options.clear_positions(user_id);
        self.accounts.clear_positions(user_id);
        self.settlements.clear_pending(user_id);

        let reset_date = clock::next_trading_day(now.date());
        self.accounts.modify(user_id, |a| {
            a.balance = Decimal::ZERO;
            a.frozen_balance = Decimal::ZERO;
            a.margin_loan_principal = Decimal::ZERO;
            a.margin_interest_accrued = Decimal::ZERO;
            a.bankrupt = true;
            a.bankrupt_count += 1;
            a.bankrupt_reset_date = Some(reset_date);
        })?;

        info!(
            user_id,
            cancelled_orders = cancelled,
            %reset_date,
            "account declared bankrupt"
        );
        if let Ok(event) = self
            .settlements
            .build_asset_event(user_id, AssetChangeReason::Bankrupt)
        {
            self.events.publish_asset(&event);
        }
        Ok(true)
    }

    /// Bring bankrupt accounts whose reset date has arrived back to the
    /// starting balance. Restorations land at the 09:00 pre-open sweep of the
    /// reset day, not at midnight.
    pub async fn restore_due(&self, now: NaiveDateTime) -> usize {
        let today = now.date();
        if now.time() < clock::pre_open() {
            return 0;
        }
        let mut restored = 0;
        for user_id in self.accounts.user_ids() {
            let due = match self.accounts.account(user_id) {
                Ok(a) => a.bankrupt && a.bankrupt_reset_date.map_or(false, |d| d <= today),
                Err(_) => false,
            };
            if !due {
                continue;
            }

            let lock = self.accounts.lock(user_id);
            let _guard = lock.lock().await;

            let initial = self.config.initial_balance;
            if self
                .accounts
                .modify(user_id, |a| {
                    // Re-check under the lock.
                    if !a.bankrupt {
                        return false;
                    }
                    a.balance = initial;
                    a.frozen_balance = Decimal::ZERO;
                    a.margin_loan_principal = Decimal::ZERO;
                    a.margin_interest_accrued = Decimal::ZERO;
                    a.bankrupt = false;
                    a.bankrupt_reset_date = None;
                    true
                })
                .unwrap_or(false)
            {
                restored += 1;
                info!(user_id, "bankrupt account restored");
                if let Ok(event) = self
                    .settlements
                    .build_asset_event(user_id, AssetChangeReason::BankruptcyReset)
                {
                    self.events.publish_asset(&event);
                }
            }
        }
        restored
    }
}
