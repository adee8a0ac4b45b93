//! Options pricing and settlement.
//!
//! Chains are strike ladders centered on spot, expiring at the close of
//! their trading day. Premiums come from Black-Scholes with a per-symbol
//! volatility (daily sigma annualized over 252 trading days); inside the
//! final minute of life a contract is worth intrinsic only. Expired
//! contracts cash-settle against spot.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::f64::consts::E;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::{AccountService, SettlementService};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::market::{clock, QuoteStore};
use crate::types::{
    AssetChangeReason, ContractStatus, OptionContract, OptionOrder, OptionOrderSide,
    OptionOrderStatus, OptionPosition, OptionQuote, OptionType,
};

/// Seconds before expiry after which a quote collapses to intrinsic value.
const INTRINSIC_ONLY_WINDOW_SECS: i64 = 60;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const SECONDS_PER_YEAR: f64 = 365.0 * 86400.0;

pub struct OptionsService {
    config: Arc<Config>,
    accounts: Arc<AccountService>,
    store: Arc<QuoteStore>,
    settlements: Arc<SettlementService>,
    events: Arc<EventBus>,
    contracts: DashMap<u64, OptionContract>,
    /// (user, contract) -> position
    positions: DashMap<(u64, u64), OptionPosition>,
    orders: DashMap<u64, OptionOrder>,
    next_contract_id: AtomicU64,
    next_order_id: AtomicU64,
}

impl OptionsService {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<AccountService>,
        store: Arc<QuoteStore>,
        settlements: Arc<SettlementService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            accounts,
            store,
            settlements,
            events,
            contracts: DashMap::new(),
            positions: DashMap::new(),
            orders: DashMap::new(),
            next_contract_id: AtomicU64::new(1),
            next_order_id: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Chain generation
    // ------------------------------------------------------------------

    /// Generate the day's chain for a symbol: CALL and PUT across a strike
    /// ladder centered on spot, expiring at today's close. If an active
    /// unexpired chain already exists it is returned unchanged.
    pub fn generate_chain(&self, symbol_id: u64, now: NaiveDateTime) -> Result<Vec<OptionContract>> {
        let symbol = self
            .store
            .symbol(symbol_id)
            .ok_or_else(|| EngineError::NotFound(format!("symbol {}", symbol_id)))?;
        let spot = self
            .store
            .price(symbol_id)
            .ok_or_else(|| EngineError::NotFound(format!("no market data for {}", symbol.code)))?;

        let existing = self.active_chain(symbol_id, now);
        if !existing.is_empty() {
            return Ok(existing);
        }

        // Strike step is 2% of spot (at least one cent); the ATM strike is
        // spot snapped to the step grid.
        let step = (spot * dec!(0.02))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .max(dec!(0.01));
        let atm = (spot / step).round() * step;
        let steps = self.config.options.chain_steps as i64;
        let expiry = now.date().and_time(clock::afternoon_close());

        let mut chain = Vec::new();
        for i in -steps..=steps {
            let strike = atm + step * Decimal::from(i);
            if strike <= Decimal::ZERO {
                continue;
            }
            for option_type in [OptionType::Call, OptionType::Put] {
                let id = self.next_contract_id.fetch_add(1, Ordering::SeqCst);
                let contract = OptionContract {
                    id,
                    symbol_id,
                    code: symbol.code.clone(),
                    option_type,
                    strike,
                    expiry,
                    status: ContractStatus::Active,
                    created_at: now,
                };
                self.contracts.insert(id, contract.clone());
                chain.push(contract);
            }
        }

        info!(symbol_id, contracts = chain.len(), "generated option chain");
        Ok(chain)
    }

    /// Active, unexpired contracts for a symbol, strikes ascending.
    pub fn active_chain(&self, symbol_id: u64, now: NaiveDateTime) -> Vec<OptionContract> {
        let mut chain: Vec<OptionContract> = self
            .contracts
            .iter()
            .filter(|c| {
                c.symbol_id == symbol_id && c.status == ContractStatus::Active && c.expiry > now
            })
            .map(|c| c.clone())
            .collect();
        chain.sort_by(|a, b| a.strike.cmp(&b.strike).then(a.id.cmp(&b.id)));
        chain
    }

    pub fn contract(&self, contract_id: u64) -> Result<OptionContract> {
        self.contracts
            .get(&contract_id)
            .map(|c| c.clone())
            .ok_or_else(|| EngineError::NotFound(format!("contract {}", contract_id)))
    }

    // ------------------------------------------------------------------
    // Pricing
    // ------------------------------------------------------------------

    /// Price a contract at the current spot.
    pub fn quote(&self, contract_id: u64, now: NaiveDateTime) -> Result<OptionQuote> {
        let contract = self.contract(contract_id)?;
        let symbol = self
            .store
            .symbol(contract.symbol_id)
            .ok_or_else(|| EngineError::NotFound(format!("symbol {}", contract.symbol_id)))?;
        let spot = self.store.price(contract.symbol_id).ok_or_else(|| {
            EngineError::NotFound(format!("no market data for {}", contract.code))
        })?;

        let intrinsic = contract.intrinsic(spot);
        let secs_left = (contract.expiry - now).num_seconds();
        if secs_left <= 0 {
            return Err(EngineError::InvalidStateTransition(
                "contract has expired".into(),
            ));
        }

        let floor = self.config.options.min_premium;
        let premium = if secs_left <= INTRINSIC_ONLY_WINDOW_SECS {
            intrinsic.max(floor)
        } else {
            let time_years = secs_left as f64 / SECONDS_PER_YEAR;
            let sigma = symbol.daily_sigma * TRADING_DAYS_PER_YEAR.sqrt();
            let bs = black_scholes_price(
                spot.to_f64().unwrap_or(0.0),
                contract.strike.to_f64().unwrap_or(0.0),
                time_years,
                sigma,
                self.config.options.risk_free_rate,
                contract.option_type,
            );
            Decimal::from_f64(bs)
                .unwrap_or(Decimal::ZERO)
                .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
                .max(floor)
        };

        Ok(OptionQuote {
            contract_id,
            premium,
            intrinsic_value: intrinsic,
            time_value: (premium - intrinsic).max(Decimal::ZERO),
            spot_price: spot,
        })
    }

    // ------------------------------------------------------------------
    // Trading
    // ------------------------------------------------------------------

    /// Buy to open: debit premium × qty plus commission.
    pub async fn buy(
        &self,
        user_id: u64,
        contract_id: u64,
        quantity: Decimal,
        now: NaiveDateTime,
    ) -> Result<OptionOrder> {
        validate_option_quantity(quantity)?;
        let quote = self.quote(contract_id, now)?;

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

        let amount = round_money(quote.premium * quantity);
        let commission = self.config.commission(amount);
        let needed = amount + commission;
        if account.balance < needed {
            return Err(EngineError::InsufficientFunds {
                needed,
                available: account.balance,
            });
        }

        self.accounts.modify(user_id, |a| {
            a.balance -= needed;
        })?;

        let mut position =
            self.positions
                .entry((user_id, contract_id))
                .or_insert_with(|| OptionPosition {
                    user_id,
                    contract_id,
                    quantity: Decimal::ZERO,
                    avg_premium: Decimal::ZERO,
                });
        let old_cost = position.avg_premium * position.quantity;
        position.quantity += quantity;
        position.avg_premium = ((old_cost + quote.premium * quantity) / position.quantity)
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
        drop(position);

        let order = self.record_order(
            user_id,
            contract_id,
            OptionOrderSide::BuyToOpen,
            quantity,
            quote.premium,
            amount,
            commission,
            now,
        );
        if let Ok(event) = self
            .settlements
            .build_asset_event(user_id, AssetChangeReason::OptionTrade)
        {
            self.events.publish_asset(&event);
        }
        Ok(order)
    }

    /// Sell to close: credit premium × qty minus commission, against an
    /// existing open position only.
    pub async fn sell(
        &self,
        user_id: u64,
        contract_id: u64,
        quantity: Decimal,
        now: NaiveDateTime,
    ) -> Result<OptionOrder> {
        validate_option_quantity(quantity)?;
        let quote = self.quote(contract_id, now)?;

        let lock = self.accounts.lock(user_id);
        let _guard = lock.lock().await;

        let held = self
            .positions
            .get(&(user_id, contract_id))
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        if quantity > held {
            return Err(EngineError::InsufficientPosition {
                requested: quantity,
                available: held,
            });
        }

        let amount = round_money(quote.premium * quantity);
        let commission = self.config.commission(amount);
        let net = (amount - commission).max(Decimal::ZERO);

        self.accounts.modify(user_id, |a| {
            a.absorb_cash(net);
        })?;

        let remove = match self.positions.get_mut(&(user_id, contract_id)) {
            Some(mut position) => {
                position.quantity -= quantity;
                position.quantity.is_zero()
            }
            None => false,
        };
        if remove {
            self.positions.remove(&(user_id, contract_id));
        }

        let order = self.record_order(
            user_id,
            contract_id,
            OptionOrderSide::SellToClose,
            quantity,
            quote.premium,
            amount,
            commission,
            now,
        );
        if let Ok(event) = self
            .settlements
            .build_asset_event(user_id, AssetChangeReason::OptionTrade)
        {
            self.events.publish_asset(&event);
        }
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Expiry settlement
    // ------------------------------------------------------------------

    /// Cash-settle every position on contracts whose expiry has passed.
    /// Payout is intrinsic value at spot × quantity. Idempotent: settled
    /// contracts are skipped and positions are removed as they pay out.
    pub async fn settle_expired(&self, now: NaiveDateTime) -> usize {
        let due: Vec<OptionContract> = self
            .contracts
            .iter()
            .filter(|c| c.status == ContractStatus::Active && c.expiry <= now)
            .map(|c| c.clone())
            .collect();

        let mut settled_positions = 0;
        for contract in due {
            let spot = match self.store.price(contract.symbol_id) {
                Some(p) => p,
                None => {
                    warn!(contract_id = contract.id, "no spot for expiry settlement");
                    continue;
                }
            };
            let payout_per_unit = contract.intrinsic(spot);

            let holders: Vec<(u64, u64)> = self
                .positions
                .iter()
                .filter(|p| p.contract_id == contract.id)
                .map(|p| (p.user_id, p.contract_id))
                .collect();

            // Group per user is trivial here: one key per (user, contract).
            let mut by_user: HashMap<u64, Vec<u64>> = HashMap::new();
            for (user_id, contract_id) in holders {
                by_user.entry(user_id).or_default().push(contract_id);
            }

            for (user_id, contract_ids) in by_user {
                let lock = self.accounts.lock(user_id);
                let _guard = lock.lock().await;

                for contract_id in contract_ids {
                    let Some((_, position)) = self.positions.remove(&(user_id, contract_id)) else {
                        continue;
                    };
                    let payout = round_money(payout_per_unit * position.quantity);
                    if payout > Decimal::ZERO {
                        if self
                            .accounts
                            .modify(user_id, |a| {
                                a.absorb_cash(payout);
                            })
                            .is_err()
                        {
                            continue;
                        }
                    }
                    settled_positions += 1;
                }

                if let Ok(event) = self
                    .settlements
                    .build_asset_event(user_id, AssetChangeReason::OptionSettled)
                {
                    self.events.publish_asset(&event);
                }
            }

            if let Some(mut c) = self.contracts.get_mut(&contract.id) {
                c.status = ContractStatus::Settled;
            }
        }

        if settled_positions > 0 {
            info!(settled_positions, "settled expired option positions");
        }
        settled_positions
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn positions_for(&self, user_id: u64) -> Vec<OptionPosition> {
        let mut all: Vec<OptionPosition> = self
            .positions
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.clone())
            .collect();
        all.sort_by_key(|p| p.contract_id);
        all
    }

    pub fn orders_for(&self, user_id: u64) -> Vec<OptionOrder> {
        let mut all: Vec<OptionOrder> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.clone())
            .collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all
    }

    /// Liquidation support: drop all of a user's option positions.
    /// Caller holds the user lock.
    pub fn clear_positions(&self, user_id: u64) {
        self.positions.retain(|(uid, _), _| *uid != user_id);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_order(
        &self,
        user_id: u64,
        contract_id: u64,
        side: OptionOrderSide,
        quantity: Decimal,
        premium: Decimal,
        amount: Decimal,
        commission: Decimal,
        now: NaiveDateTime,
    ) -> OptionOrder {
        let order = OptionOrder {
            id: self.next_order_id.fetch_add(1, Ordering::SeqCst),
            user_id,
            contract_id,
            side,
            quantity,
            premium,
            amount,
            commission,
            status: OptionOrderStatus::Filled,
            created_at: now,
        };
        self.orders.insert(order.id, order.clone());
        info!(
            order_id = order.id,
            user_id,
            contract_id,
            side = ?side,
            "option order filled"
        );
        order
    }
}

fn validate_option_quantity(quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO || !quantity.fract().is_zero() {
        return Err(EngineError::Validation(
            "option quantity must be a positive whole number".into(),
        ));
    }
    Ok(())
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// ----------------------------------------------------------------------
// Black-Scholes
// ----------------------------------------------------------------------

fn d1(spot: f64, strike: f64, time: f64, volatility: f64, r: f64) -> f64 {
    (f64::ln(spot / strike) + (r + volatility.powi(2) / 2.0) * time) / (volatility * time.sqrt())
}

/// Standard normal cumulative distribution function.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / 2.0_f64.sqrt()))
}

/// European option price. Degenerate inputs fall back to intrinsic value.
fn black_scholes_price(
    spot: f64,
    strike: f64,
    time_years: f64,
    volatility: f64,
    r: f64,
    option_type: OptionType,
) -> f64 {
    let intrinsic = match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    };
    if spot <= 0.0 || strike <= 0.0 || time_years <= 0.0 || volatility <= 0.0 {
        return intrinsic;
    }

    let d1 = d1(spot, strike, time_years, volatility, r);
    let d2 = d1 - volatility * time_years.sqrt();
    let discount = E.powf(-r * time_years);

    let price = match option_type {
        OptionType::Call => spot * norm_cdf(d1) - strike * discount * norm_cdf(d2),
        OptionType::Put => strike * discount * norm_cdf(-d2) - spot * norm_cdf(-d1),
    };
    price.max(0.0)
}

/// Error function approximation for normal CDF.
fn erf(x: f64) -> f64 {
    // Horner form approximation
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * E.powf(-x * x);

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_scholes_call() {
        // ATM call: S=100, K=100, T=1yr, sigma=20%, r=5%
        let price = black_scholes_price(100.0, 100.0, 1.0, 0.20, 0.05, OptionType::Call);
        // Expected around 10.45 for these parameters
        assert!((price - 10.45).abs() < 0.5);
    }

    #[test]
    fn test_black_scholes_put() {
        // ATM put: S=100, K=100, T=1yr, sigma=20%, r=5%
        let price = black_scholes_price(100.0, 100.0, 1.0, 0.20, 0.05, OptionType::Put);
        // Expected around 5.57 (put-call parity)
        assert!((price - 5.57).abs() < 0.5);
    }

    #[test]
    fn test_degenerate_time_falls_back_to_intrinsic() {
        let price = black_scholes_price(120.0, 100.0, 0.0, 0.20, 0.05, OptionType::Call);
        assert_eq!(price, 20.0);
    }

    #[test]
    fn test_deep_itm_call_near_intrinsic_plus_carry() {
        let price = black_scholes_price(150.0, 100.0, 0.1, 0.20, 0.03, OptionType::Call);
        assert!(price >= 50.0);
        assert!(price < 55.0);
    }

    #[test]
    fn test_option_quantity_validation() {
        use rust_decimal_macros::dec;
        assert!(validate_option_quantity(dec!(10)).is_ok());
        assert!(validate_option_quantity(dec!(0)).is_err());
        assert!(validate_option_quantity(dec!(1.5)).is_err());
    }
}
