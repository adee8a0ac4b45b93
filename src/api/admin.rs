/**
 * Admin task API
 *
 * Runtime control over the background loops plus manual triggers for every
 * scheduled job. Restricted to the admin account (the first user to log in,
 * user id 1).
 *
 * 1. GET /api/admin/task/status - Loop switches, current slot, client count
 * 2. POST /api/admin/task/market-push/start|stop
 * 3. POST /api/admin/task/settlement/start|stop
 * 4. POST /api/admin/task/generate-today-data - Load/catch up today's paths
 * 5. POST /api/admin/task/expire-orders - Expire stale day orders now
 * 6. POST /api/admin/task/settle - Run a settlement sweep now
 * 7. POST /api/admin/task/bankruptcy/check - Scan all accounts
 * 8. POST /api/admin/task/margin/accrue-interest - Charge today's interest
 * 9. GET|PUT /api/admin/task/margin/daily-interest-rate
 * 10. POST /api/admin/task/options/generate-chain/:code
 * 11. POST /api/admin/task/options/settle-expired
 * 12. POST /api/admin/task/ranking/refresh
 */

use axum::{
    extract::{FromRef, FromRequestParts, Path, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::auth::Authenticated;
use super::ApiResponse;
use crate::error::EngineError;
use crate::tasks::{self, TaskStatus};
use crate::types::OptionContract;
use crate::AppState;

/// First registered account.
const ADMIN_USER_ID: u64 = 1;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/market-push/start", post(market_push_start))
        .route("/market-push/stop", post(market_push_stop))
        .route("/settlement/start", post(settlement_start))
        .route("/settlement/stop", post(settlement_stop))
        .route("/generate-today-data", post(generate_today_data))
        .route("/expire-orders", post(expire_orders))
        .route("/settle", post(settle_now))
        .route("/bankruptcy/check", post(bankruptcy_check))
        .route("/margin/accrue-interest", post(accrue_interest))
        .route(
            "/margin/daily-interest-rate",
            get(get_interest_rate).put(set_interest_rate),
        )
        .route("/options/generate-chain/:code", post(generate_chain))
        .route("/options/settle-expired", post(settle_options))
        .route("/ranking/refresh", post(refresh_ranking))
}

/// Admin-only extractor: authenticates, then checks the admin id.
pub struct Admin(pub u64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Authenticated(user_id) = Authenticated::from_request_parts(parts, state).await?;
        if user_id != ADMIN_USER_ID {
            return Err(EngineError::Forbidden);
        }
        Ok(Admin(user_id))
    }
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: usize,
}

/// GET /api/admin/task/status
async fn get_status(State(state): State<AppState>, _admin: Admin) -> Json<ApiResponse<TaskStatus>> {
    Json(ApiResponse::new(state.tasks.status(&state)))
}

/// POST /api/admin/task/market-push/start
async fn market_push_start(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<TaskStatus>> {
    state.tasks.set_market_push(true);
    Json(ApiResponse::new(state.tasks.status(&state)))
}

/// POST /api/admin/task/market-push/stop
async fn market_push_stop(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<TaskStatus>> {
    state.tasks.set_market_push(false);
    Json(ApiResponse::new(state.tasks.status(&state)))
}

/// POST /api/admin/task/settlement/start
async fn settlement_start(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<TaskStatus>> {
    state.tasks.set_settlement(true);
    Json(ApiResponse::new(state.tasks.status(&state)))
}

/// POST /api/admin/task/settlement/stop
async fn settlement_stop(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<TaskStatus>> {
    state.tasks.set_settlement(false);
    Json(ApiResponse::new(state.tasks.status(&state)))
}

/// POST /api/admin/task/generate-today-data
///
/// Generate today's paths for any symbol missing them and publish up to the
/// current slot. Used after adding symbols or restarting mid-day.
async fn generate_today_data(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<TaskStatus>> {
    let now = chrono::Local::now().naive_local();
    tasks::push_tick(&state, now).await;
    Json(ApiResponse::new(state.tasks.status(&state)))
}

/// POST /api/admin/task/expire-orders
async fn expire_orders(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<CountResponse>> {
    let now = chrono::Local::now().naive_local();
    let count = state.orders.expire_stale(now).await;
    Json(ApiResponse::new(CountResponse { count }))
}

/// POST /api/admin/task/settle
async fn settle_now(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<CountResponse>> {
    let now = chrono::Local::now().naive_local();
    let count = state.settlements.sweep(now).await;
    Json(ApiResponse::new(CountResponse { count }))
}

/// POST /api/admin/task/bankruptcy/check
async fn bankruptcy_check(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<CountResponse>> {
    let now = chrono::Local::now().naive_local();
    let count = state.margin.check_all(now).await;
    Json(ApiResponse::new(CountResponse { count }))
}

/// POST /api/admin/task/margin/accrue-interest
async fn accrue_interest(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<CountResponse>> {
    let now = chrono::Local::now().naive_local();
    let count = state.margin.accrue_daily_interest(now).await;
    Json(ApiResponse::new(CountResponse { count }))
}

#[derive(Debug, Serialize, Deserialize)]
struct InterestRateBody {
    daily_rate: Decimal,
}

/// GET /api/admin/task/margin/daily-interest-rate
async fn get_interest_rate(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<InterestRateBody>> {
    Json(ApiResponse::new(InterestRateBody {
        daily_rate: state.margin.daily_rate(),
    }))
}

/// PUT /api/admin/task/margin/daily-interest-rate
async fn set_interest_rate(
    State(state): State<AppState>,
    _admin: Admin,
    Json(body): Json<InterestRateBody>,
) -> Result<Json<ApiResponse<InterestRateBody>>, EngineError> {
    state.margin.set_daily_rate(body.daily_rate)?;
    Ok(Json(ApiResponse::new(InterestRateBody {
        daily_rate: state.margin.daily_rate(),
    })))
}

/// POST /api/admin/task/options/generate-chain/:code
async fn generate_chain(
    State(state): State<AppState>,
    _admin: Admin,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<Vec<OptionContract>>>, EngineError> {
    let symbol = state
        .store
        .symbol_by_code(&code)
        .ok_or_else(|| EngineError::NotFound(format!("symbol {}", code)))?;
    let now = chrono::Local::now().naive_local();
    let chain = state.options.generate_chain(symbol.id, now)?;
    Ok(Json(ApiResponse::new(chain)))
}

/// POST /api/admin/task/options/settle-expired
async fn settle_options(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<CountResponse>> {
    let now = chrono::Local::now().naive_local();
    let count = state.options.settle_expired(now).await;
    Json(ApiResponse::new(CountResponse { count }))
}

/// POST /api/admin/task/ranking/refresh
async fn refresh_ranking(
    State(state): State<AppState>,
    _admin: Admin,
) -> Json<ApiResponse<CountResponse>> {
    state.ranking.refresh();
    Json(ApiResponse::new(CountResponse {
        count: state.ranking.leaderboard().len(),
    }))
}
