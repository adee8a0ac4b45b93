use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user account. Balances are mutated exclusively under the per-user lock
/// held by the engine services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user_id: u64,
    pub username: String,
    /// Available cash.
    pub balance: Decimal,
    /// Funds reserved by open limit BUY orders.
    pub frozen_balance: Decimal,
    /// Outstanding margin loan principal.
    pub margin_loan_principal: Decimal,
    /// Accrued, unpaid margin interest.
    pub margin_interest_accrued: Decimal,
    pub bankrupt: bool,
    pub bankrupt_count: u32,
    /// Date at which a bankrupt account is restored to initial capital.
    pub bankrupt_reset_date: Option<NaiveDate>,
    /// Starting capital; the profit baseline and the bankruptcy-reset value.
    pub initial_balance: Decimal,
    pub created_at: NaiveDateTime,
}

impl Account {
    /// Absorb a cash inflow through the repayment waterfall: accrued
    /// interest first, then loan principal, remainder to available balance.
    /// Returns (interest_paid, principal_paid, to_balance).
    pub fn absorb_cash(&mut self, amount: Decimal) -> (Decimal, Decimal, Decimal) {
        let mut remaining = amount;

        let interest_paid = remaining.min(self.margin_interest_accrued);
        self.margin_interest_accrued -= interest_paid;
        remaining -= interest_paid;

        let principal_paid = remaining.min(self.margin_loan_principal);
        self.margin_loan_principal -= principal_paid;
        remaining -= principal_paid;

        self.balance += remaining;
        (interest_paid, principal_paid, remaining)
    }
}

/// An open holding of a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub user_id: u64,
    pub symbol_id: u64,
    /// Total quantity held. Invariant: `quantity >= frozen_quantity >= 0`.
    pub quantity: Decimal,
    /// Quantity reserved by open limit SELL orders.
    pub frozen_quantity: Decimal,
    /// Average acquisition cost per unit.
    pub avg_cost: Decimal,
}

impl Position {
    pub fn available(&self) -> Decimal {
        self.quantity - self.frozen_quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
}

/// Order lifecycle. Terminal states never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Triggered,
    Settling,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub user_id: u64,
    pub symbol_id: u64,
    pub code: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    /// Leverage multiple; market BUY only.
    pub leverage: Option<u32>,
    /// Discount buff consumed by this order; market BUY only.
    pub buff_id: Option<u64>,
    pub status: OrderStatus,
    /// Funds reserved at submission (limit BUY only).
    pub frozen_amount: Decimal,
    pub filled_price: Option<Decimal>,
    pub filled_amount: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub filled_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Settled,
}

/// T+1 delayed release of sell proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: u64,
    pub user_id: u64,
    pub order_id: u64,
    /// Net proceeds (amount minus commission) to release.
    pub amount: Decimal,
    pub status: SettlementStatus,
    pub trade_time: NaiveDateTime,
    pub settle_time: NaiveDateTime,
    pub settled_at: Option<NaiveDateTime>,
}
