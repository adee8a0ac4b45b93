/**
 * Order API
 *
 * 1. POST /api/orders - Submit a market or limit order
 * 2. POST /api/orders/:id/cancel - Cancel a pending limit order
 * 3. GET /api/orders?status=&page=&page_size= - The caller's orders
 * 4. GET /api/orders/:id - One order
 * 5. GET /api/orders/recent - Latest fills across all users
 */

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::auth::Authenticated;
use super::ApiResponse;
use crate::error::EngineError;
use crate::services::OrderRequest;
use crate::types::{Order, OrderStatus};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit).get(list))
        .route("/recent", get(recent))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel))
}

/// POST /api/orders
async fn submit(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
    Json(request): Json<OrderRequest>,
) -> Result<Json<ApiResponse<Order>>, EngineError> {
    let now = chrono::Local::now().naive_local();
    let order = state.orders.submit(user_id, request, now).await?;
    Ok(Json(ApiResponse::new(order)))
}

/// POST /api/orders/:id/cancel
async fn cancel(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
    Path(order_id): Path<u64>,
) -> Result<Json<ApiResponse<Order>>, EngineError> {
    let now = chrono::Local::now().naive_local();
    let order = state.orders.cancel(user_id, order_id, now).await?;
    Ok(Json(ApiResponse::new(order)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<OrderStatus>,
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Serialize)]
struct OrderPage {
    orders: Vec<Order>,
    total: usize,
    page: usize,
}

/// GET /api/orders?status=pending&page=0&page_size=20
async fn list(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
    Query(query): Query<ListQuery>,
) -> Json<ApiResponse<OrderPage>> {
    let (orders, total) = state
        .orders
        .list(user_id, query.status, query.page, query.page_size.min(100));
    Json(ApiResponse::new(OrderPage {
        orders,
        total,
        page: query.page,
    }))
}

/// GET /api/orders/:id
async fn get_order(
    State(state): State<AppState>,
    Authenticated(user_id): Authenticated,
    Path(order_id): Path<u64>,
) -> Result<Json<ApiResponse<Order>>, EngineError> {
    let order = state
        .orders
        .order(order_id)
        .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))?;
    if order.user_id != user_id {
        return Err(EngineError::Forbidden);
    }
    Ok(Json(ApiResponse::new(order)))
}

/// GET /api/orders/recent
async fn recent(State(state): State<AppState>) -> Json<ApiResponse<Vec<Order>>> {
    Json(ApiResponse::new(state.orders.recent_fills(20)))
}
