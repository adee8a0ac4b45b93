/**
 * Account API
 *
 * 1. GET /api/account - Full portfolio snapshot
 * 2. GET /api/account/positions - Open positions with live valuations
 */

use axum::{extract::State, routing::get, Json, Router};
use rust_decimal::Decimal;
use serde::Serialize;

use super::auth::Authenticated;
use super::ApiResponse;
use crate::error::EngineError;
use crate::types::{Account, Position};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_portfolio))
        .route("/positions", get(get_positions))
}

#[derive(Debug, Serialize)]
struct PortfolioResponse {
    account: Account,
    position_market_value: Decimal,
    pending_settlement: Decimal,
    total_assets: Decimal,
    positions: Vec<PositionView>,
}

#[derive(Debug, Serialize)]
struct PositionView {
    #[serde(flatten)]
    position: Position,
    code: Option<String>,
    price: Option<Decimal>,
    market_value: Decimal,
    /// Unrealized P&L against average cost.
    profit: Decimal,
}

fn position_views(state: &AppState, user_id: u64) -> Vec<PositionView> {
    state
        .accounts
        .positions(user_id)
        .into_iter()
        .map(|position| {
            let symbol = state.store.symbol(position.symbol_id);
            let price = state.store.price(position.symbol_id);
            let market_value = state
                .store
                .market_value(position.symbol_id, position.quantity);
            let profit = market_value - position.avg_cost * position.quantity;
            PositionView {
                code: symbol.map(|s| s.code),
                price,
                market_value,
                profit,
                position,
            }
        })
        .collect()
}

/// GET /api/account
async fn get_portfolio(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Result<Json<ApiResponse<PortfolioResponse>>, EngineError> {
    let account = state.accounts.account(user_id)?;
    let positions = position_views(&state, user_id);
    let position_market_value = positions.iter().map(|p| p.market_value).sum();
    let pending_settlement = state.settlements.pending_total(user_id);
    let total_assets = account.balance + account.frozen_balance + position_market_value
        + pending_settlement
        - account.margin_loan_principal
        - account.margin_interest_accrued;

    Ok(Json(ApiResponse::new(PortfolioResponse {
        account,
        position_market_value,
        pending_settlement,
        total_assets,
        positions,
    })))
}

/// GET /api/account/positions
async fn get_positions(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Json<ApiResponse<Vec<PositionView>>> {
    Json(ApiResponse::new(position_views(&state, user_id)))
}
