/**
 * Market data API
 *
 * Read-only quote and history endpoints. All data comes from the in-memory
 * quote store, which the market push loop advances every 10 seconds.
 *
 * 1. GET /api/market/symbols - All listed symbols
 * 2. GET /api/market/symbols/:code - One symbol
 * 3. GET /api/market/quotes - Current quote for every symbol
 * 4. GET /api/market/quotes/:code - Current quote for one symbol
 * 5. GET /api/market/movers - Top gainers and losers
 * 6. GET /api/market/ticks/:code?from=SLOT - Published ticks from a slot
 * 7. GET /api/market/candles/:code?limit=N - Daily candle history
 * 8. GET /api/market/intraday/:code/:date - Full path of a past day
 */

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::error::EngineError;
use crate::types::{DailyCandle, Quote, Symbol, Tick};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/symbols", get(list_symbols))
        .route("/symbols/:code", get(get_symbol))
        .route("/quotes", get(list_quotes))
        .route("/quotes/:code", get(get_quote))
        .route("/movers", get(get_movers))
        .route("/ticks/:code", get(get_ticks))
        .route("/candles/:code", get(get_candles))
        .route("/intraday/:code/:date", get(get_intraday))
}

/// GET /api/market/symbols
async fn list_symbols(State(state): State<AppState>) -> Json<ApiResponse<Vec<Symbol>>> {
    Json(ApiResponse::new(state.store.symbols()))
}

/// GET /api/market/symbols/:code
async fn get_symbol(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<Symbol>>, EngineError> {
    let symbol = state
        .store
        .symbol_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("symbol {}", code)))?;
    Ok(Json(ApiResponse::new(symbol)))
}

/// GET /api/market/quotes
async fn list_quotes(State(state): State<AppState>) -> Json<ApiResponse<Vec<Quote>>> {
    let quotes = state
        .store
        .symbols()
        .iter()
        .filter_map(|s| state.store.quote(s.id))
        .collect();
    Json(ApiResponse::new(quotes))
}

/// GET /api/market/quotes/:code
async fn get_quote(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<Quote>>, EngineError> {
    let quote = state
        .store
        .quote_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("no quote for {}", code)))?;
    Ok(Json(ApiResponse::new(quote)))
}

#[derive(Debug, Deserialize)]
struct MoversQuery {
    #[serde(default = "default_movers_n")]
    n: usize,
}

fn default_movers_n() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct MoversResponse {
    gainers: Vec<Quote>,
    losers: Vec<Quote>,
}

/// GET /api/market/movers?n=5
async fn get_movers(
    State(state): State<AppState>,
    Query(query): Query<MoversQuery>,
) -> Json<ApiResponse<MoversResponse>> {
    let (gainers, losers) = state.store.movers(query.n);
    Json(ApiResponse::new(MoversResponse { gainers, losers }))
}

#[derive(Debug, Deserialize)]
struct TicksQuery {
    #[serde(default)]
    from: usize,
}

/// GET /api/market/ticks/:code?from=SLOT
///
/// Incremental tick fetch: clients poll with the last slot they have seen.
async fn get_ticks(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<TicksQuery>,
) -> Result<Json<ApiResponse<Vec<Tick>>>, EngineError> {
    let symbol = state
        .store
        .symbol_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("symbol {}", code)))?;
    Ok(Json(ApiResponse::new(
        state.store.ticks_since(symbol.id, query.from),
    )))
}

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    #[serde(default = "default_candle_limit")]
    limit: usize,
}

fn default_candle_limit() -> usize {
    30
}

/// GET /api/market/candles/:code?limit=30
async fn get_candles(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<CandlesQuery>,
) -> Result<Json<ApiResponse<Vec<DailyCandle>>>, EngineError> {
    let symbol = state
        .store
        .symbol_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("symbol {}", code)))?;
    Ok(Json(ApiResponse::new(
        state.store.daily_candles(symbol.id, query.limit),
    )))
}

/// GET /api/market/intraday/:code/:date
async fn get_intraday(
    State(state): State<AppState>,
    Path((code, date)): Path<(String, NaiveDate)>,
) -> Result<Json<ApiResponse<Vec<Tick>>>, EngineError> {
    let symbol = state
        .store
        .symbol_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("symbol {}", code)))?;
    let ticks = state
        .store
        .intraday(symbol.id, date)
        .ok_or_else(|| EngineError::NotFound(format!("no data for {} on {}", code, date)))?;
    Ok(Json(ApiResponse::new(ticks)))
}
