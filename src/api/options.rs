/**
 * Options API
 *
 * 1. GET /api/options/chain/:code - Active chain with live quotes
 * 2. GET /api/options/quote/:contract_id - Price one contract
 * 3. POST /api/options/orders - Buy to open / sell to close
 * 4. GET /api/options/positions - The caller's open contracts
 * 5. GET /api/options/orders - The caller's option orders
 */

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::auth::Authenticated;
use super::ApiResponse;
use crate::error::EngineError;
use crate::types::{OptionContract, OptionOrder, OptionOrderSide, OptionPosition, OptionQuote};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chain/:code", get(get_chain))
        .route("/quote/:contract_id", get(get_quote))
        .route("/orders", post(submit).get(list_orders))
        .route("/positions", get(list_positions))
}

#[derive(Debug, Serialize)]
struct ChainEntry {
    contract: OptionContract,
    quote: Option<OptionQuote>,
}

/// GET /api/options/chain/:code
async fn get_chain(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<Vec<ChainEntry>>>, EngineError> {
    let symbol = state
        .store
        .symbol_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("symbol {}", code)))?;
    let now = chrono::Local::now().naive_local();
    let chain = state
        .options
        .active_chain(symbol.id, now)
        .into_iter()
        .map(|contract| {
            let quote = state.options.quote(contract.id, now).ok();
            ChainEntry { contract, quote }
        })
        .collect();
    Ok(Json(ApiResponse::new(chain)))
}

/// GET /api/options/quote/:contract_id
async fn get_quote(
    State(state): State<AppState>,
    Path(contract_id): Path<u64>,
) -> Result<Json<ApiResponse<OptionQuote>>, EngineError> {
    let now = chrono::Local::now().naive_local();
    Ok(Json(ApiResponse::new(state.options.quote(contract_id, now)?)))
}

#[derive(Debug, Deserialize)]
struct OptionOrderRequest {
    contract_id: u64,
    side: OptionOrderSide,
    quantity: Decimal,
}

/// POST /api/options/orders
async fn submit(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
    Json(request): Json<OptionOrderRequest>,
) -> Result<Json<ApiResponse<OptionOrder>>, EngineError> {
    let now = chrono::Local::now().naive_local();
    let order = match request.side {
        OptionOrderSide::BuyToOpen => {
            state
                .options
                .buy(user_id, request.contract_id, request.quantity, now)
                .await?
        }
        OptionOrderSide::SellToClose => {
            state
                .options
                .sell(user_id, request.contract_id, request.quantity, now)
                .await?
        }
    };
    Ok(Json(ApiResponse::new(order)))
}

/// GET /api/options/positions
async fn list_positions(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Json<ApiResponse<Vec<OptionPosition>>> {
    Json(ApiResponse::new(state.options.positions_for(user_id)))
}

/// GET /api/options/orders
async fn list_orders(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Json<ApiResponse<Vec<OptionOrder>>> {
    Json(ApiResponse::new(state.options.orders_for(user_id)))
}
