/**
 * Buff API
 *
 * 1. POST /api/buffs/draw - Today's draw (one per day)
 * 2. GET /api/buffs/today - Today's result plus spendable discount coupons
 */

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::auth::Authenticated;
use super::ApiResponse;
use crate::error::EngineError;
use crate::types::Buff;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/draw", post(draw))
        .route("/today", get(today))
}

/// POST /api/buffs/draw
async fn draw(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Result<Json<ApiResponse<Buff>>, EngineError> {
    let now = chrono::Local::now().naive_local();
    let buff = state.buffs.draw(user_id, now).await?;
    Ok(Json(ApiResponse::new(buff)))
}

#[derive(Debug, Serialize)]
struct TodayResponse {
    drawn: Option<Buff>,
    usable_discounts: Vec<Buff>,
}

/// GET /api/buffs/today
async fn today(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
) -> Json<ApiResponse<TodayResponse>> {
    let now = chrono::Local::now().naive_local();
    let (drawn, usable_discounts) = state.buffs.today(user_id, now);
    Json(ApiResponse::new(TodayResponse {
        drawn,
        usable_discounts,
    }))
}
