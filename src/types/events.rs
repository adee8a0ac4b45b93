use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Order, Position, Quote};

/// Why an account snapshot changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetChangeReason {
    OrderPlaced,
    OrderFilled,
    OrderCancelled,
    OrderExpired,
    SettlementCompleted,
    OptionTrade,
    OptionSettled,
    InterestAccrued,
    Bankrupt,
    BankruptcyReset,
    BuffCash,
    BuffStock,
}

/// Full account snapshot pushed on every balance-affecting mutation.
/// Clients replace local state wholesale rather than applying deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetChangeEvent {
    pub user_id: u64,
    pub balance: Decimal,
    pub frozen_balance: Decimal,
    pub position_market_value: Decimal,
    pub pending_settlement: Decimal,
    pub margin_loan_principal: Decimal,
    pub margin_interest_accrued: Decimal,
    pub total_assets: Decimal,
    pub bankrupt: bool,
    pub bankrupt_count: u32,
    pub bankrupt_reset_date: Option<NaiveDate>,
    pub reason: AssetChangeReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChangeEvent {
    pub user_id: u64,
    pub symbol_id: u64,
    pub code: String,
    /// None when the position was fully closed.
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub user_id: u64,
    pub order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteEvent {
    pub quote: Quote,
}
