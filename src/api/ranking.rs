/**
 * Ranking API
 *
 * 1. GET /api/ranking - Current leaderboard (top 50 by total assets)
 */

use axum::{extract::State, routing::get, Json, Router};

use super::ApiResponse;
use crate::services::RankingEntry;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_leaderboard))
}

/// GET /api/ranking
async fn get_leaderboard(State(state): State<AppState>) -> Json<ApiResponse<Vec<RankingEntry>>> {
    Json(ApiResponse::new(state.ranking.leaderboard()))
}
