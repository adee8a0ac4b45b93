use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Daily reward draw outcomes.
///
/// Discount buffs are held until applied to a market BUY; cash and stock
/// grants take effect at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuffKind {
    Discount95,
    Discount90,
    Discount85,
    Discount80,
    Cash5000,
    Cash10000,
    Cash20000,
    Cash50000,
    Stock100,
    Stock300,
    Stock500,
    Stock1000,
}

impl BuffKind {
    /// Trade-amount multiplier for discount buffs.
    pub fn discount_rate(&self) -> Option<Decimal> {
        match self {
            BuffKind::Discount95 => Some(dec!(0.95)),
            BuffKind::Discount90 => Some(dec!(0.90)),
            BuffKind::Discount85 => Some(dec!(0.85)),
            BuffKind::Discount80 => Some(dec!(0.80)),
            _ => None,
        }
    }

    pub fn cash_amount(&self) -> Option<Decimal> {
        match self {
            BuffKind::Cash5000 => Some(dec!(5000)),
            BuffKind::Cash10000 => Some(dec!(10000)),
            BuffKind::Cash20000 => Some(dec!(20000)),
            BuffKind::Cash50000 => Some(dec!(50000)),
            _ => None,
        }
    }

    pub fn stock_quantity(&self) -> Option<Decimal> {
        match self {
            BuffKind::Stock100 => Some(dec!(100)),
            BuffKind::Stock300 => Some(dec!(300)),
            BuffKind::Stock500 => Some(dec!(500)),
            BuffKind::Stock1000 => Some(dec!(1000)),
            _ => None,
        }
    }
}

/// A drawn reward. At most one draw per user per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buff {
    pub id: u64,
    pub user_id: u64,
    pub date: NaiveDate,
    pub kind: BuffKind,
    pub rarity: Rarity,
    /// Symbol code for stock grants.
    pub extra: Option<String>,
    pub used: bool,
    /// Discount buffs expire at midnight after the draw day.
    pub expires_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discount_rates() {
        assert_eq!(BuffKind::Discount80.discount_rate(), Some(dec!(0.80)));
        assert_eq!(BuffKind::Cash5000.discount_rate(), None);
    }

    #[test]
    fn test_kind_exclusivity() {
        // Each kind maps to exactly one effect family
        for kind in [
            BuffKind::Discount95,
            BuffKind::Cash10000,
            BuffKind::Stock500,
        ] {
            let effects = [
                kind.discount_rate().is_some(),
                kind.cash_amount().is_some(),
                kind.stock_quantity().is_some(),
            ];
            assert_eq!(effects.iter().filter(|e| **e).count(), 1);
        }
    }
}
