use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Settled,
}

/// A listed option contract. Immutable once created; settled contracts are
/// kept as historical records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub id: u64,
    pub symbol_id: u64,
    pub code: String,
    pub option_type: OptionType,
    pub strike: Decimal,
    pub expiry: NaiveDateTime,
    pub status: ContractStatus,
    pub created_at: NaiveDateTime,
}

impl OptionContract {
    /// Intrinsic value against a spot price.
    pub fn intrinsic(&self, spot: Decimal) -> Decimal {
        let value = match self.option_type {
            OptionType::Call => spot - self.strike,
            OptionType::Put => self.strike - spot,
        };
        value.max(Decimal::ZERO)
    }
}

/// An open option holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionPosition {
    pub user_id: u64,
    pub contract_id: u64,
    pub quantity: Decimal,
    /// Average premium paid per contract.
    pub avg_premium: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionOrderSide {
    BuyToOpen,
    SellToClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionOrderStatus {
    Filled,
    Rejected,
}

/// Option trade record. Option orders execute synchronously, so only
/// terminal statuses exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionOrder {
    pub id: u64,
    pub user_id: u64,
    pub contract_id: u64,
    pub side: OptionOrderSide,
    pub quantity: Decimal,
    pub premium: Decimal,
    pub amount: Decimal,
    pub commission: Decimal,
    pub status: OptionOrderStatus,
    pub created_at: NaiveDateTime,
}

/// Priced view of a contract at the current spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub contract_id: u64,
    pub premium: Decimal,
    pub intrinsic_value: Decimal,
    pub time_value: Decimal,
    pub spot_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn contract(option_type: OptionType, strike: Decimal) -> OptionContract {
        OptionContract {
            id: 1,
            symbol_id: 1,
            code: "AAPL".to_string(),
            option_type,
            strike,
            expiry: chrono::NaiveDate::from_ymd_opt(2024, 6, 3)
                .unwrap()
                .and_hms_opt(15, 0, 0)
                .unwrap(),
            status: ContractStatus::Active,
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 6, 3)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_call_intrinsic() {
        let c = contract(OptionType::Call, dec!(10));
        assert_eq!(c.intrinsic(dec!(12)), dec!(2));
        assert_eq!(c.intrinsic(dec!(8)), dec!(0));
    }

    #[test]
    fn test_put_intrinsic() {
        let p = contract(OptionType::Put, dec!(10));
        assert_eq!(p.intrinsic(dec!(8)), dec!(2));
        assert_eq!(p.intrinsic(dec!(12)), dec!(0));
    }
}
