//! Order execution engine.
//!
//! Market orders execute synchronously against the current quote. Limit
//! orders reserve funds or shares, sit PENDING, and are evaluated on every
//! tick; unfilled day orders expire on the next trading morning. Every
//! balance or position mutation happens under the owner's user lock.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::{AccountService, BuffService, SettlementService};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::market::{clock, QuoteStore};
use crate::types::{
    AssetChangeReason, Order, OrderKind, OrderSide, OrderStatus, OrderStatusEvent,
    PositionChangeEvent, Symbol, SymbolKind,
};

/// Smallest tradable crypto quantity.
const MIN_CRYPTO_QUANTITY: Decimal = dec!(0.00001);

#[derive(Debug, Clone, Deserialize)]
pub struct OrderRequest {
    pub code: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub leverage: Option<u32>,
    pub buff_id: Option<u64>,
}

pub struct OrderService {
    config: Arc<Config>,
    accounts: Arc<AccountService>,
    store: Arc<QuoteStore>,
    settlements: Arc<SettlementService>,
    buffs: Arc<BuffService>,
    events: Arc<EventBus>,
    orders: DashMap<u64, Order>,
    next_id: AtomicU64,
}

impl OrderService {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<AccountService>,
        store: Arc<QuoteStore>,
        settlements: Arc<SettlementService>,
        buffs: Arc<BuffService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            accounts,
            store,
            settlements,
            buffs,
            events,
            orders: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit an order. Market orders fill synchronously; limit orders are
    /// left PENDING with funds/shares reserved.
    pub async fn submit(&self, user_id: u64, req: OrderRequest, now: NaiveDateTime) -> Result<Order> {
        let symbol = self
            .store
            .symbol_by_code(&req.code)
            .ok_or_else(|| EngineError::NotFound(format!("symbol {}", req.code)))?;

        validate_quantity(&symbol, req.quantity)?;

        // Crypto trades around the clock; stock market orders are gated on
        // the trading session. Limit orders may be placed any time.
        if req.kind == OrderKind::Market
            && symbol.kind == SymbolKind::Stock
            && self.config.trading_hours_enabled
            && !clock::is_trading_time(now)
        {
            return Err(EngineError::MarketClosed);
        }

        let lock = self.accounts.lock(user_id);
        let _guard = lock.lock().await;

        let account = self.accounts.account(user_id)?;
        if account.bankrupt {
            let until = account
                .bankrupt_reset_date
                .map(|d| d.to_string())
                .unwrap_or_default();
            return Err(EngineError::AccountBankrupt(until));
        }

        let price = self
            .store
            .price(symbol.id)
            .ok_or_else(|| EngineError::NotFound(format!("no market data for {}", req.code)))?;

        let order = match req.kind {
            OrderKind::Market => match req.side {
                OrderSide::Buy => self.fill_market_buy(user_id, &symbol, &req, price, now)?,
                OrderSide::Sell => self.fill_market_sell(user_id, &symbol, &req, price, now)?,
            },
            OrderKind::Limit => self.place_limit(user_id, &symbol, &req, price, now)?,
        };

        self.orders.insert(order.id, order.clone());
        self.events.publish_order(&OrderStatusEvent {
            user_id,
            order: order.clone(),
        });
        let reason = if order.status == OrderStatus::Filled {
            AssetChangeReason::OrderFilled
        } else {
            AssetChangeReason::OrderPlaced
        };
        if let Ok(event) = self.settlements.build_asset_event(user_id, reason) {
            self.events.publish_asset(&event);
        }

        info!(
            order_id = order.id,
            user_id,
            code = %order.code,
            side = ?order.side,
            kind = ?order.kind,
            status = ?order.status,
            "order accepted"
        );
        Ok(order)
    }

    fn fill_market_buy(
        &self,
        user_id: u64,
        symbol: &Symbol,
        req: &OrderRequest,
        price: Decimal,
        now: NaiveDateTime,
    ) -> Result<Order> {
        if req.leverage.is_some() && req.buff_id.is_some() {
            return Err(EngineError::ConflictingModifiers);
        }

        let mut amount = round_money(price * req.quantity);

        // Discount buff scales the trade amount before commission.
        let discount = match req.buff_id {
            Some(buff_id) => Some(self.buffs.discount_rate(user_id, buff_id, now)?),
            None => None,
        };
        if let Some(rate) = discount {
            amount = round_money(amount * rate);
        }

        let leverage = match req.leverage {
            Some(n) => {
                if !self.config.margin.enabled {
                    return Err(EngineError::Validation("margin trading disabled".into()));
                }
                if n <= 1 || n > self.config.margin.max_leverage {
                    return Err(EngineError::Validation(format!(
                        "leverage must be in 2..={}",
                        self.config.margin.max_leverage
                    )));
                }
                Some(n)
            }
            None => None,
        };

        let commission = self.config.commission(amount);
        let (cash_needed, borrowed) = match leverage {
            Some(n) => {
                // Margin rounds up so the borrowed share never exceeds
                // amount - margin.
                let margin = (amount / Decimal::from(n))
                    .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero);
                (margin + commission, amount - margin)
            }
            None => (amount + commission, Decimal::ZERO),
        };

        let account = self.accounts.account(user_id)?;
        if account.balance < cash_needed {
            return Err(EngineError::InsufficientFunds {
                needed: cash_needed,
                available: account.balance,
            });
        }

        self.accounts.modify(user_id, |a| {
            a.balance -= cash_needed;
            a.margin_loan_principal += borrowed;
        })?;
        self.accounts
            .add_to_position(user_id, symbol.id, req.quantity, price);
        if let Some(buff_id) = req.buff_id {
            self.buffs.mark_used(buff_id);
        }

        self.publish_position(user_id, symbol);

        let mut order = self.new_order(user_id, symbol, req, now);
        order.status = OrderStatus::Filled;
        order.filled_price = Some(price);
        order.filled_amount = Some(amount);
        order.commission = Some(commission);
        order.filled_at = Some(now);
        Ok(order)
    }

    fn fill_market_sell(
        &self,
        user_id: u64,
        symbol: &Symbol,
        req: &OrderRequest,
        price: Decimal,
        now: NaiveDateTime,
    ) -> Result<Order> {
        if req.leverage.is_some() || req.buff_id.is_some() {
            return Err(EngineError::Validation(
                "leverage and buffs apply to market buys only".into(),
            ));
        }

        let available = self
            .accounts
            .position(user_id, symbol.id)
            .map(|p| p.available())
            .unwrap_or(Decimal::ZERO);
        if req.quantity > available {
            return Err(EngineError::InsufficientPosition {
                requested: req.quantity,
                available,
            });
        }

        let amount = round_money(price * req.quantity);
        let commission = self.config.commission(amount);
        let net = amount - commission;

        self.accounts.modify_position(user_id, symbol.id, |p| {
            p.quantity -= req.quantity;
        });

        let mut order = self.new_order(user_id, symbol, req, now);
        order.status = OrderStatus::Filled;
        order.filled_price = Some(price);
        order.filled_amount = Some(amount);
        order.commission = Some(commission);
        order.filled_at = Some(now);

        self.settlements.enqueue(user_id, order.id, net, now);
        self.publish_position(user_id, symbol);
        Ok(order)
    }

    fn place_limit(
        &self,
        user_id: u64,
        symbol: &Symbol,
        req: &OrderRequest,
        price: Decimal,
        now: NaiveDateTime,
    ) -> Result<Order> {
        if req.leverage.is_some() || req.buff_id.is_some() {
            return Err(EngineError::Validation(
                "leverage and buffs apply to market buys only".into(),
            ));
        }
        let limit_price = req
            .limit_price
            .ok_or_else(|| EngineError::Validation("limit price required".into()))?;
        if limit_price <= Decimal::ZERO {
            return Err(EngineError::Validation("limit price must be positive".into()));
        }

        let band = self.config.limit_price_band;
        let lower = price * (Decimal::ONE - band);
        let upper = price * (Decimal::ONE + band);
        if limit_price < lower || limit_price > upper {
            return Err(EngineError::Validation(format!(
                "limit price {} outside allowed band [{}, {}]",
                limit_price,
                round_money(lower),
                round_money(upper)
            )));
        }

        let mut order = self.new_order(user_id, symbol, req, now);
        match req.side {
            OrderSide::Buy => {
                let amount = round_money(limit_price * req.quantity);
                let freeze = amount + self.config.commission(amount);
                let account = self.accounts.account(user_id)?;
                if account.balance < freeze {
                    return Err(EngineError::InsufficientFunds {
                        needed: freeze,
                        available: account.balance,
                    });
                }
                self.accounts.modify(user_id, |a| {
                    a.balance -= freeze;
                    a.frozen_balance += freeze;
                })?;
                order.frozen_amount = freeze;
            }
            OrderSide::Sell => {
                let available = self
                    .accounts
                    .position(user_id, symbol.id)
                    .map(|p| p.available())
                    .unwrap_or(Decimal::ZERO);
                if req.quantity > available {
                    return Err(EngineError::InsufficientPosition {
                        requested: req.quantity,
                        available,
                    });
                }
                self.accounts.modify_position(user_id, symbol.id, |p| {
                    p.frozen_quantity += req.quantity;
                });
            }
        }

        order.status = OrderStatus::Pending;
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    pub async fn cancel(&self, user_id: u64, order_id: u64, now: NaiveDateTime) -> Result<Order> {
        let lock = self.accounts.lock(user_id);
        let _guard = lock.lock().await;

        let order = self
            .orders
            .get(&order_id)
            .map(|o| o.clone())
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?;
        if order.user_id != user_id {
            return Err(EngineError::Forbidden);
        }
        if order.status != OrderStatus::Pending {
            return Err(EngineError::InvalidStateTransition(format!(
                "cannot cancel order in state {:?}",
                order.status
            )));
        }

        self.release_reservation(&order)?;
        let order = self.transition(order_id, OrderStatus::Cancelled, now)?;

        if let Ok(event) = self
            .settlements
            .build_asset_event(user_id, AssetChangeReason::OrderCancelled)
        {
            self.events.publish_asset(&event);
        }
        info!(order_id, user_id, "order cancelled");
        Ok(order)
    }

    /// Cancel every open limit order for a user (liquidation path).
    /// Caller already holds the user lock.
    pub fn cancel_all_pending(&self, user_id: u64, now: NaiveDateTime) -> usize {
        let pending: Vec<u64> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && o.status == OrderStatus::Pending)
            .map(|o| o.id)
            .collect();

        let mut cancelled = 0;
        for order_id in &pending {
            let Some(order) = self.orders.get(order_id).map(|o| o.clone()) else {
                continue;
            };
            if self.release_reservation(&order).is_ok()
                && self.transition(*order_id, OrderStatus::Cancelled, now).is_ok()
            {
                cancelled += 1;
            }
        }
        cancelled
    }

    fn release_reservation(&self, order: &Order) -> Result<()> {
        match order.side {
            OrderSide::Buy => {
                self.accounts.modify(order.user_id, |a| {
                    a.frozen_balance -= order.frozen_amount;
                    a.balance += order.frozen_amount;
                })?;
            }
            OrderSide::Sell => {
                self.accounts
                    .modify_position(order.user_id, order.symbol_id, |p| {
                        p.frozen_quantity -= order.quantity;
                    });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trigger evaluation (called by the push loop on each tick)
    // ------------------------------------------------------------------

    /// Fill every pending limit order on `symbol_id` whose trigger condition
    /// the new price satisfies. Returns the number filled.
    pub async fn evaluate_triggers(
        &self,
        symbol_id: u64,
        price: Decimal,
        now: NaiveDateTime,
    ) -> usize {
        let candidates: Vec<u64> = self
            .orders
            .iter()
            .filter(|o| {
                o.symbol_id == symbol_id
                    && o.status == OrderStatus::Pending
                    && o.kind == OrderKind::Limit
                    && match (o.side, o.limit_price) {
                        (OrderSide::Buy, Some(limit)) => price <= limit,
                        (OrderSide::Sell, Some(limit)) => price >= limit,
                        _ => false,
                    }
            })
            .map(|o| o.id)
            .collect();

        let mut filled = 0;
        for order_id in candidates {
            let Some(user_id) = self.orders.get(&order_id).map(|o| o.user_id) else {
                continue;
            };
            let lock = self.accounts.lock(user_id);
            let _guard = lock.lock().await;

            match self.fill_triggered(order_id, price, now) {
                Ok(true) => filled += 1,
                Ok(false) => {}
                Err(e) => debug!(order_id, "trigger fill failed: {}", e),
            }
        }
        filled
    }

    /// Execute one triggered order at the tick price that tripped it. Caller
    /// holds the user lock. The PENDING check under the lock resolves the
    /// race with concurrent cancellation.
    fn fill_triggered(&self, order_id: u64, price: Decimal, now: NaiveDateTime) -> Result<bool> {
        let order = self
            .orders
            .get(&order_id)
            .map(|o| o.clone())
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?;
        if order.status != OrderStatus::Pending {
            return Ok(false);
        }
        let symbol = self
            .store
            .symbol(order.symbol_id)
            .ok_or_else(|| EngineError::NotFound(format!("symbol {}", order.symbol_id)))?;

        self.transition(order_id, OrderStatus::Triggered, now)?;
        self.transition(order_id, OrderStatus::Settling, now)?;

        let amount = round_money(price * order.quantity);
        let commission = self.config.commission(amount);

        match order.side {
            OrderSide::Buy => {
                // Consume the reservation; anything frozen beyond the final
                // cost goes back to the balance.
                let cost = amount + commission;
                let refund = order.frozen_amount - cost;
                self.accounts.modify(order.user_id, |a| {
                    a.frozen_balance -= order.frozen_amount;
                    a.balance += refund.max(Decimal::ZERO);
                })?;
                self.accounts
                    .add_to_position(order.user_id, order.symbol_id, order.quantity, price);
            }
            OrderSide::Sell => {
                self.accounts
                    .modify_position(order.user_id, order.symbol_id, |p| {
                        p.frozen_quantity -= order.quantity;
                        p.quantity -= order.quantity;
                    });
                let net = amount - commission;
                self.settlements.enqueue(order.user_id, order_id, net, now);
            }
        }

        {
            let mut stored = self
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?;
            stored.filled_price = Some(price);
            stored.filled_amount = Some(amount);
            stored.commission = Some(commission);
            stored.filled_at = Some(now);
        }
        self.transition(order_id, OrderStatus::Filled, now)?;

        self.publish_position(order.user_id, &symbol);
        if let Ok(event) = self
            .settlements
            .build_asset_event(order.user_id, AssetChangeReason::OrderFilled)
        {
            self.events.publish_asset(&event);
        }
        info!(order_id, user_id = order.user_id, "limit order filled");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Expiry (day orders)
    // ------------------------------------------------------------------

    /// Expire pending limit orders created before today. Run from the
    /// morning sweep and the admin endpoint. Returns the number expired.
    pub async fn expire_stale(&self, now: NaiveDateTime) -> usize {
        let stale: Vec<(u64, u64)> = self
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at.date() < now.date())
            .map(|o| (o.id, o.user_id))
            .collect();

        let mut expired = 0;
        for (order_id, user_id) in stale {
            let lock = self.accounts.lock(user_id);
            let _guard = lock.lock().await;

            let Some(order) = self.orders.get(&order_id).map(|o| o.clone()) else {
                continue;
            };
            if order.status != OrderStatus::Pending {
                continue;
            }
            if self.release_reservation(&order).is_err() {
                continue;
            }
            if self.transition(order_id, OrderStatus::Expired, now).is_ok() {
                expired += 1;
                if let Ok(event) = self
                    .settlements
                    .build_asset_event(user_id, AssetChangeReason::OrderExpired)
                {
                    self.events.publish_asset(&event);
                }
            }
        }

        if expired > 0 {
            info!(expired, "expired stale limit orders");
        }
        expired
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn order(&self, order_id: u64) -> Option<Order> {
        self.orders.get(&order_id).map(|o| o.clone())
    }

    /// Paginated listing of a user's orders, newest first.
    pub fn list(
        &self,
        user_id: u64,
        status: Option<OrderStatus>,
        page: usize,
        page_size: usize,
    ) -> (Vec<Order>, usize) {
        let mut all: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && status.map_or(true, |s| o.status == s))
            .map(|o| o.clone())
            .collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));

        let total = all.len();
        let start = page.saturating_mul(page_size).min(total);
        let end = (start + page_size).min(total);
        (all[start..end].to_vec(), total)
    }

    /// Latest fills across all users, for the activity ticker.
    pub fn recent_fills(&self, limit: usize) -> Vec<Order> {
        let mut filled: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::Filled)
            .map(|o| o.clone())
            .collect();
        filled.sort_by(|a, b| b.filled_at.cmp(&a.filled_at));
        filled.truncate(limit);
        filled
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn new_order(
        &self,
        user_id: u64,
        symbol: &Symbol,
        req: &OrderRequest,
        now: NaiveDateTime,
    ) -> Order {
        Order {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id,
            symbol_id: symbol.id,
            code: symbol.code.clone(),
            side: req.side,
            kind: req.kind,
            quantity: req.quantity,
            limit_price: req.limit_price,
            leverage: req.leverage,
            buff_id: req.buff_id,
            status: OrderStatus::Pending,
            frozen_amount: Decimal::ZERO,
            filled_price: None,
            filled_amount: None,
            commission: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
        }
    }

    /// Apply a state transition, enforcing the order state machine, and
    /// publish the status change.
    fn transition(&self, order_id: u64, to: OrderStatus, now: NaiveDateTime) -> Result<Order> {
        let order = {
            let mut order = self
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?;
            let from = order.status;
            let legal = matches!(
                (from, to),
                (OrderStatus::Pending, OrderStatus::Triggered)
                    | (OrderStatus::Pending, OrderStatus::Cancelled)
                    | (OrderStatus::Pending, OrderStatus::Expired)
                    | (OrderStatus::Triggered, OrderStatus::Settling)
                    | (OrderStatus::Settling, OrderStatus::Filled)
            );
            if !legal {
                return Err(EngineError::InvalidStateTransition(format!(
                    "{:?} -> {:?}",
                    from, to
                )));
            }
            order.status = to;
            order.updated_at = now;
            order.clone()
        };

        self.events.publish_order(&OrderStatusEvent {
            user_id: order.user_id,
            order: order.clone(),
        });
        Ok(order)
    }

    fn publish_position(&self, user_id: u64, symbol: &Symbol) {
        self.events.publish_position(&PositionChangeEvent {
            user_id,
            symbol_id: symbol.id,
            code: symbol.code.clone(),
            position: self.accounts.position(user_id, symbol.id),
        });
    }
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_quantity(symbol: &Symbol, quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(EngineError::Validation("quantity must be positive".into()));
    }
    match symbol.kind {
        SymbolKind::Stock => {
            if !quantity.fract().is_zero() {
                return Err(EngineError::Validation(
                    "stock quantity must be a whole number".into(),
                ));
            }
        }
        SymbolKind::Crypto => {
            if quantity < MIN_CRYPTO_QUANTITY {
                return Err(EngineError::Validation(format!(
                    "minimum crypto quantity is {}",
                    MIN_CRYPTO_QUANTITY
                )));
            }
            if quantity.round_dp(5) != quantity {
                return Err(EngineError::Validation(
                    "crypto quantity supports at most 5 decimal places".into(),
                ));
            }
        }
    }
    Ok(())
}
