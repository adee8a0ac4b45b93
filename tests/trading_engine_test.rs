//! End-to-end tests for the order execution engine.
//!
//! Tests cover:
//! - Market buy/sell accounting (commission, T+1 proceeds)
//! - Limit order reservations, triggers, cancellation and expiry
//! - Leverage accounting and modifier conflicts
//! - Bankruptcy gating

use bourse::config::Config;
use bourse::error::EngineError;
use bourse::market::clock;
use bourse::services::OrderRequest;
use bourse::types::{OrderKind, OrderSide, OrderStatus, Symbol, SymbolKind, VolatilityClass};
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

fn monday_morning() -> NaiveDateTime {
    // 2024-06-03 is a Monday, 10:00 is inside the morning session
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

/// Register a stock and load a flat all-day path at `price`, published to the
/// current slot so quotes resolve.
fn list_stock(state: &AppState, id: u64, code: &str, price: Decimal) -> Symbol {
    let symbol = Symbol {
        id,
        code: code.to_string(),
        name: code.to_string(),
        kind: SymbolKind::Stock,
        industry: Some("tech".to_string()),
        volatility: VolatilityClass::Stable,
        daily_sigma: 0.02,
    };
    state.store.register_symbol(symbol.clone());
    state.store.load_day(
        id,
        monday_morning().date(),
        vec![price; clock::SLOTS_PER_DAY],
    );
    state.store.publish_to(id, 0);
    symbol
}

fn login(state: &AppState, name: &str) -> u64 {
    let (_, account) = state.accounts.login(name).unwrap();
    account.user_id
}

fn buy(code: &str, quantity: Decimal) -> OrderRequest {
    OrderRequest {
        code: code.to_string(),
        side: OrderSide::Buy,
        kind: OrderKind::Market,
        quantity,
        limit_price: None,
        leverage: None,
        buff_id: None,
    }
}

fn sell(code: &str, quantity: Decimal) -> OrderRequest {
    OrderRequest {
        side: OrderSide::Sell,
        ..buy(code, quantity)
    }
}

fn limit(mut req: OrderRequest, price: Decimal) -> OrderRequest {
    req.kind = OrderKind::Limit;
    req.limit_price = Some(price);
    req
}

// =============================================================================
// Market orders
// =============================================================================

#[tokio::test]
async fn test_market_buy_debits_amount_plus_commission() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let order = state
        .orders
        .submit(user, buy("NOVA", dec!(100)), monday_morning())
        .await
        .unwrap();

    // amount 10000.00, commission max(10000 * 0.0005, 5) = 5.00
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_price, Some(dec!(100.00)));
    assert_eq!(order.filled_amount, Some(dec!(10000.00)));
    assert_eq!(order.commission, Some(dec!(5.00)));

    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.balance, dec!(89995.00));
    let position = state.accounts.position(user, 1).unwrap();
    assert_eq!(position.quantity, dec!(100));
    assert_eq!(position.avg_cost, dec!(100.0000));
}

#[tokio::test]
async fn test_commission_floor_applies_to_small_trades() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(10.00));
    let user = login(&state, "alice");

    let order = state
        .orders
        .submit(user, buy("NOVA", dec!(1)), monday_morning())
        .await
        .unwrap();

    // 10.00 * 0.0005 = 0.005, floored to 5.00
    assert_eq!(order.commission, Some(dec!(5.00)));
}

#[tokio::test]
async fn test_market_buy_insufficient_funds() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let err = state
        .orders
        .submit(user, buy("NOVA", dec!(10000)), monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));

    // nothing moved
    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.balance, dec!(100000.00));
    assert!(state.accounts.position(user, 1).is_none());
}

#[tokio::test]
async fn test_sell_proceeds_are_delayed_until_next_trading_day() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    state
        .orders
        .submit(user, buy("NOVA", dec!(100)), monday_morning())
        .await
        .unwrap();
    let balance_after_buy = state.accounts.account(user).unwrap().balance;

    state
        .orders
        .submit(user, sell("NOVA", dec!(100)), monday_morning())
        .await
        .unwrap();

    // proceeds 10000 - 5 commission, pending until T+1
    assert_eq!(state.settlements.pending_total(user), dec!(9995.00));
    assert_eq!(state.accounts.account(user).unwrap().balance, balance_after_buy);
    assert!(state.accounts.position(user, 1).is_none());

    // sweep on Tuesday at trade time releases the cash
    let tuesday = clock::settle_time(monday_morning());
    assert_eq!(state.settlements.sweep(tuesday).await, 1);
    assert_eq!(
        state.accounts.account(user).unwrap().balance,
        balance_after_buy + dec!(9995.00)
    );
    assert_eq!(state.settlements.pending_total(user), dec!(0));
}

#[tokio::test]
async fn test_oversell_rejected() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    state
        .orders
        .submit(user, buy("NOVA", dec!(10)), monday_morning())
        .await
        .unwrap();

    let err = state
        .orders
        .submit(user, sell("NOVA", dec!(11)), monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientPosition { .. }));
}

#[tokio::test]
async fn test_stock_quantity_must_be_whole() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let err = state
        .orders
        .submit(user, buy("NOVA", dec!(1.5)), monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_market_order_rejected_outside_session() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let lunch = monday_morning().date().and_hms_opt(12, 0, 0).unwrap();
    let err = state
        .orders
        .submit(user, buy("NOVA", dec!(1)), lunch)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MarketClosed));
}

// =============================================================================
// Leverage and modifiers
// =============================================================================

#[tokio::test]
async fn test_leveraged_buy_splits_margin_and_loan() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let mut req = buy("NOVA", dec!(100));
    req.leverage = Some(4);
    state
        .orders
        .submit(user, req, monday_morning())
        .await
        .unwrap();

    // amount 10000: margin 2500, borrowed 7500, cash out 2500 + 5 commission
    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.balance, dec!(97495.00));
    assert_eq!(account.margin_loan_principal, dec!(7500.00));
    let position = state.accounts.position(user, 1).unwrap();
    assert_eq!(position.quantity, dec!(100));
}

#[tokio::test]
async fn test_leverage_and_discount_conflict() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let mut req = buy("NOVA", dec!(10));
    req.leverage = Some(2);
    req.buff_id = Some(1);
    let err = state
        .orders
        .submit(user, req, monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConflictingModifiers));
}

#[tokio::test]
async fn test_leverage_out_of_range_rejected() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    for leverage in [1, 51] {
        let mut req = buy("NOVA", dec!(10));
        req.leverage = Some(leverage);
        let err = state
            .orders
            .submit(user, req, monday_morning())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}

// =============================================================================
// Limit orders
// =============================================================================

#[tokio::test]
async fn test_limit_buy_reserves_funds_and_cancel_releases() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let order = state
        .orders
        .submit(user, limit(buy("NOVA", dec!(100)), dec!(90.00)), monday_morning())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    // 9000 + est. commission 5.00 frozen
    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.frozen_balance, dec!(9005.00));
    assert_eq!(account.balance, dec!(90995.00));

    let cancelled = state
        .orders
        .cancel(user, order.id, monday_morning())
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.frozen_balance, dec!(0));
    assert_eq!(account.balance, dec!(100000.00));
}

#[tokio::test]
async fn test_limit_price_band_enforced() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    // below 50.00 and above 150.00 are out of band
    for price in [dec!(49.99), dec!(150.01)] {
        let err = state
            .orders
            .submit(user, limit(buy("NOVA", dec!(10)), price), monday_morning())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
    // the band edges are allowed
    for price in [dec!(50.00), dec!(150.00)] {
        state
            .orders
            .submit(user, limit(buy("NOVA", dec!(10)), price), monday_morning())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_limit_buy_triggers_and_fills_at_tick_price() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let order = state
        .orders
        .submit(user, limit(buy("NOVA", dec!(100)), dec!(95.00)), monday_morning())
        .await
        .unwrap();

    // price above the limit: no trigger
    assert_eq!(
        state
            .orders
            .evaluate_triggers(1, dec!(96.00), monday_morning())
            .await,
        0
    );

    // a tick below the limit fills at the tick price, not the limit
    assert_eq!(
        state
            .orders
            .evaluate_triggers(1, dec!(94.00), monday_morning())
            .await,
        1
    );
    let filled = state.orders.order(order.id).unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_price, Some(dec!(94.00)));
    assert_eq!(filled.filled_amount, Some(dec!(9400.00)));

    // frozen 9500 + 5.00 est. commission; cost 9400 + 5.00; surplus refunded
    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.frozen_balance, dec!(0));
    assert_eq!(account.balance, dec!(90595.00));
    let position = state.accounts.position(user, 1).unwrap();
    assert_eq!(position.quantity, dec!(100));
    assert_eq!(position.avg_cost, dec!(94.0000));
}

#[tokio::test]
async fn test_limit_sell_reserves_shares_and_enqueues_settlement_on_fill() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    state
        .orders
        .submit(user, buy("NOVA", dec!(100)), monday_morning())
        .await
        .unwrap();

    state
        .orders
        .submit(user, limit(sell("NOVA", dec!(100)), dec!(110.00)), monday_morning())
        .await
        .unwrap();
    assert_eq!(
        state.accounts.position(user, 1).unwrap().frozen_quantity,
        dec!(100)
    );

    // oversell of the remaining (zero) available shares is rejected
    let err = state
        .orders
        .submit(user, sell("NOVA", dec!(1)), monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientPosition { .. }));

    // a tick above the limit fills at the tick price
    state
        .orders
        .evaluate_triggers(1, dec!(112.00), monday_morning())
        .await;
    // 11200 - 5.60 commission pending T+1
    assert_eq!(state.settlements.pending_total(user), dec!(11194.40));
    assert!(state.accounts.position(user, 1).is_none());
}

#[tokio::test]
async fn test_day_orders_expire_next_morning() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let order = state
        .orders
        .submit(user, limit(buy("NOVA", dec!(10)), dec!(90.00)), monday_morning())
        .await
        .unwrap();

    // still pending at the close
    let close = monday_morning().date().and_hms_opt(15, 30, 0).unwrap();
    assert_eq!(state.orders.expire_stale(close).await, 0);

    // gone the next morning, with the reservation released
    let tuesday = NaiveDate::from_ymd_opt(2024, 6, 4)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    assert_eq!(state.orders.expire_stale(tuesday).await, 1);
    assert_eq!(
        state.orders.order(order.id).unwrap().status,
        OrderStatus::Expired
    );
    let account = state.accounts.account(user).unwrap();
    assert_eq!(account.frozen_balance, dec!(0));
    assert_eq!(account.balance, dec!(100000.00));
}

#[tokio::test]
async fn test_cancel_requires_ownership_and_pending_state() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let alice = login(&state, "alice");
    let bob = login(&state, "bob");

    let order = state
        .orders
        .submit(alice, limit(buy("NOVA", dec!(10)), dec!(90.00)), monday_morning())
        .await
        .unwrap();

    let err = state
        .orders
        .cancel(bob, order.id, monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));

    state
        .orders
        .cancel(alice, order.id, monday_morning())
        .await
        .unwrap();
    let err = state
        .orders
        .cancel(alice, order.id, monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition(_)));
}

// =============================================================================
// Crypto
// =============================================================================

#[tokio::test]
async fn test_crypto_trades_outside_stock_sessions() {
    let state = state();
    let symbol = Symbol {
        id: 9,
        code: "BTCUSDT".to_string(),
        name: "Bitcoin / USDT".to_string(),
        kind: SymbolKind::Crypto,
        industry: None,
        volatility: VolatilityClass::Volatile,
        daily_sigma: 0.04,
    };
    state.store.register_symbol(symbol);
    state.store.load_day(
        9,
        monday_morning().date(),
        vec![dec!(50000.00); clock::SLOTS_PER_DAY],
    );
    state.store.publish_to(9, 0);
    let user = login(&state, "alice");

    let lunch = monday_morning().date().and_hms_opt(12, 0, 0).unwrap();
    let order = state
        .orders
        .submit(user, buy("BTCUSDT", dec!(0.5)), lunch)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);

    // below the minimum lot
    let err = state
        .orders
        .submit(user, buy("BTCUSDT", dec!(0.000001)), lunch)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// =============================================================================
// Bankruptcy gating
// =============================================================================

#[tokio::test]
async fn test_bankrupt_account_cannot_trade_until_reset() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    // force insolvency and declare
    state
        .accounts
        .modify(user, |a| a.margin_loan_principal = dec!(500000))
        .unwrap();
    assert!(state.margin.check_user(user, monday_morning()).await.unwrap());

    let err = state
        .orders
        .submit(user, buy("NOVA", dec!(1)), monday_morning())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AccountBankrupt(_)));

    // restored the next trading day with fresh capital
    let tuesday = NaiveDate::from_ymd_opt(2024, 6, 4)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    assert_eq!(state.margin.restore_due(tuesday).await, 1);
    let order = state
        .orders
        .submit(user, buy("NOVA", dec!(1)), tuesday.date().and_hms_opt(10, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
}

// =============================================================================
// Buff draws
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_draws_yield_a_single_buff() {
    let state = state();
    list_stock(&state, 1, "NOVA", dec!(100.00));
    let user = login(&state, "alice");

    let first = {
        let state = state.clone();
        tokio::spawn(async move { state.buffs.draw(user, monday_morning()).await })
    };
    let second = {
        let state = state.clone();
        tokio::spawn(async move { state.buffs.draw(user, monday_morning()).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    // the day stays spent
    let err = state.buffs.draw(user, monday_morning()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let (drawn, _) = state.buffs.today(user, monday_morning());
    assert!(drawn.is_some());
}
