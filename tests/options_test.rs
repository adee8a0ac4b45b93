//! End-to-end tests for option chains, trading and expiry settlement.
//!
//! Tests cover:
//! - Chain shape (strike ladder, CALL/PUT pairing, expiry)
//! - Quote floors and intrinsic value
//! - Buy-to-open / sell-to-close accounting
//! - Cash settlement at expiry

use bourse::config::Config;
use bourse::error::EngineError;
use bourse::market::clock;
use bourse::types::{ContractStatus, OptionType, Symbol, SymbolKind, VolatilityClass};
use bourse::AppState;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Harness
// =============================================================================

fn state() -> AppState {
    AppState::new(Config::default())
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn morning() -> NaiveDateTime {
    monday().and_hms_opt(10, 0, 0).unwrap()
}

fn list_stock_at(state: &AppState, price: Decimal) {
    state.store.register_symbol(Symbol {
        id: 1,
        code: "NOVA".to_string(),
        name: "NOVA".to_string(),
        kind: SymbolKind::Stock,
        industry: Some("tech".to_string()),
        volatility: VolatilityClass::Stable,
        daily_sigma: 0.02,
    });
    reprice(state, price);
}

/// Replace the loaded day with a flat path at `price`.
fn reprice(state: &AppState, price: Decimal) {
    state
        .store
        .load_day(1, monday(), vec![price; clock::SLOTS_PER_DAY]);
    state.store.publish_to(1, 0);
}

fn login(state: &AppState, name: &str) -> u64 {
    let (_, account) = state.accounts.login(name).unwrap();
    account.user_id
}

// =============================================================================
// Chain generation
// =============================================================================

#[test]
fn test_chain_shape() {
    let state = state();
    list_stock_at(&state, dec!(10.00));

    let chain = state.options.generate_chain(1, morning()).unwrap();
    // ATM +/- 5 steps, CALL and PUT each: 2 * 11 = 22 contracts
    assert_eq!(chain.len(), 22);

    let calls: Vec<_> = chain
        .iter()
        .filter(|c| c.option_type == OptionType::Call)
        .collect();
    assert_eq!(calls.len(), 11);

    // step is 2% of spot = 0.20; strikes run 9.00..=11.00 around ATM 10.00
    assert!(calls.iter().any(|c| c.strike == dec!(10.00)));
    assert_eq!(calls.first().unwrap().strike, dec!(9.00));
    assert_eq!(calls.last().unwrap().strike, dec!(11.00));

    // expiry is the close of the generation day
    for contract in &chain {
        assert_eq!(contract.expiry, monday().and_hms_opt(15, 0, 0).unwrap());
    }

    // regeneration returns the same chain
    let again = state.options.generate_chain(1, morning()).unwrap();
    assert_eq!(again.len(), 22);
    assert_eq!(again.first().unwrap().id, chain.first().unwrap().id);
}

#[test]
fn test_chain_skips_non_positive_strikes() {
    let state = state();
    // step floors at 0.01; with a 0.05 spot the lowest rungs would go <= 0
    list_stock_at(&state, dec!(0.05));

    let chain = state.options.generate_chain(1, morning()).unwrap();
    assert!(chain.iter().all(|c| c.strike > Decimal::ZERO));
    assert!(chain.len() < 22);
}

// =============================================================================
// Quotes
// =============================================================================

#[test]
fn test_quote_has_premium_floor_and_nonnegative_time_value() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let chain = state.options.generate_chain(1, morning()).unwrap();

    for contract in &chain {
        let quote = state.options.quote(contract.id, morning()).unwrap();
        assert!(quote.premium >= dec!(0.01));
        assert!(quote.premium >= quote.intrinsic_value);
        assert!(quote.time_value >= Decimal::ZERO);
        assert_eq!(quote.spot_price, dec!(10.00));
    }
}

#[test]
fn test_quote_collapses_to_intrinsic_near_expiry() {
    let state = state();
    list_stock_at(&state, dec!(12.00));
    let chain = state.options.generate_chain(1, morning()).unwrap();
    let call = chain
        .iter()
        .find(|c| c.option_type == OptionType::Call && c.strike < dec!(12.00))
        .cloned()
        .unwrap();

    // 30 seconds before expiry: premium == intrinsic (ITM call)
    let near_expiry = monday().and_hms_opt(14, 59, 30).unwrap();
    let quote = state.options.quote(call.id, near_expiry).unwrap();
    assert_eq!(quote.premium, dec!(12.00) - call.strike);
    assert_eq!(quote.time_value, dec!(0));

    // past expiry: no quote
    let after = monday().and_hms_opt(15, 0, 1).unwrap();
    assert!(state.options.quote(call.id, after).is_err());
}

// =============================================================================
// Trading
// =============================================================================

#[tokio::test]
async fn test_buy_to_open_debits_premium_plus_commission() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let user = login(&state, "alice");
    let chain = state.options.generate_chain(1, morning()).unwrap();
    let atm_call = chain
        .iter()
        .find(|c| c.option_type == OptionType::Call && c.strike == dec!(10.00))
        .unwrap();

    let quote = state.options.quote(atm_call.id, morning()).unwrap();
    let order = state
        .options
        .buy(user, atm_call.id, dec!(10), morning())
        .await
        .unwrap();

    assert_eq!(order.premium, quote.premium);
    let expected_amount = (quote.premium * dec!(10))
        .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    assert_eq!(order.amount, expected_amount);

    let account = state.accounts.account(user).unwrap();
    assert_eq!(
        account.balance,
        dec!(100000.00) - order.amount - order.commission
    );
    let positions = state.options.positions_for(user);
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(10));
}

#[tokio::test]
async fn test_sell_to_close_requires_position() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let user = login(&state, "alice");
    let chain = state.options.generate_chain(1, morning()).unwrap();
    let contract = chain.first().unwrap();

    let err = state
        .options
        .sell(user, contract.id, dec!(1), morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientPosition { .. }));
}

#[tokio::test]
async fn test_option_quantity_must_be_whole() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let user = login(&state, "alice");
    let chain = state.options.generate_chain(1, morning()).unwrap();

    let err = state
        .options
        .buy(user, chain[0].id, dec!(0.5), morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// =============================================================================
// Expiry settlement
// =============================================================================

#[tokio::test]
async fn test_itm_call_cash_settles_at_intrinsic() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let user = login(&state, "alice");
    let chain = state.options.generate_chain(1, morning()).unwrap();
    let atm_call = chain
        .iter()
        .find(|c| c.option_type == OptionType::Call && c.strike == dec!(10.00))
        .unwrap();

    state
        .options
        .buy(user, atm_call.id, dec!(10), morning())
        .await
        .unwrap();
    let balance_after_buy = state.accounts.account(user).unwrap().balance;

    // spot rallies to 12 by the close; payout = (12 - 10) * 10 = 20.00
    reprice(&state, dec!(12.00));
    let close = monday().and_hms_opt(15, 0, 0).unwrap();
    assert_eq!(state.options.settle_expired(close).await, 1);

    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.balance, balance_after_buy + dec!(20.00));
    assert!(state.options.positions_for(user).is_empty());
    assert_eq!(
        state.options.contract(atm_call.id).unwrap().status,
        ContractStatus::Settled
    );

    // idempotent: a second sweep pays nothing
    assert_eq!(state.options.settle_expired(close).await, 0);
    assert_eq!(state.accounts.account(user).unwrap().balance, account.balance);
}

#[tokio::test]
async fn test_otm_contract_expires_worthless() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let user = login(&state, "alice");
    let chain = state.options.generate_chain(1, morning()).unwrap();
    let otm_call = chain
        .iter()
        .find(|c| c.option_type == OptionType::Call && c.strike == dec!(11.00))
        .unwrap();

    state
        .options
        .buy(user, otm_call.id, dec!(5), morning())
        .await
        .unwrap();
    let balance_after_buy = state.accounts.account(user).unwrap().balance;

    // spot unchanged: the 11.00 call finishes out of the money
    let close = monday().and_hms_opt(15, 0, 0).unwrap();
    state.options.settle_expired(close).await;

    assert_eq!(state.accounts.account(user).unwrap().balance, balance_after_buy);
    assert!(state.options.positions_for(user).is_empty());
}

#[tokio::test]
async fn test_settlement_repays_margin_first() {
    let state = state();
    list_stock_at(&state, dec!(10.00));
    let user = login(&state, "alice");
    let chain = state.options.generate_chain(1, morning()).unwrap();
    let atm_call = chain
        .iter()
        .find(|c| c.option_type == OptionType::Call && c.strike == dec!(10.00))
        .unwrap();

    state
        .options
        .buy(user, atm_call.id, dec!(10), morning())
        .await
        .unwrap();
    state
        .accounts
        .modify(user, |a| a.margin_interest_accrued = dec!(20.00))
        .unwrap();
    let balance_before = state.accounts.account(user).unwrap().balance;

    reprice(&state, dec!(12.00));
    let close = monday().and_hms_opt(15, 0, 0).unwrap();
    state.options.settle_expired(close).await;

    // the 20.00 payout is fully absorbed by accrued interest
    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.balance, balance_before);
    assert_eq!(account.margin_interest_accrued, dec!(0));
}
