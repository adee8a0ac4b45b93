/**
 * Settlement API
 *
 * 1. GET /api/settlements/pending - The caller's unsettled T+1 records
 */

use axum::{extract::State, routing::get, Json, Router};
use rust_decimal::Decimal;
use serde::Serialize;

use super::auth::Authenticated;
use super::ApiResponse;
use crate::types::SettlementRecord;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/pending", get(get_pending))
}

#[derive(Debug, Serialize)]
struct PendingResponse {
    records: Vec<SettlementRecord>,
    total: Decimal,
}

/// GET /api/settlements/pending
async fn get_pending(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Json<ApiResponse<PendingResponse>> {
    let records = state.settlements.pending_for(user_id);
    let total = state.settlements.pending_total(user_id);
    Json(ApiResponse::new(PendingResponse { records, total }))
}
