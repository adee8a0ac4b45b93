pub mod account;
pub mod admin;
pub mod auth;
pub mod buffs;
pub mod health;
pub mod market;
pub mod options;
pub mod orders;
pub mod ranking;
pub mod settlement;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/auth", auth::router())
        .nest("/api/market", market::router())
        .nest("/api/orders", orders::router())
        .nest("/api/account", account::router())
        .nest("/api/settlements", settlement::router())
        .nest("/api/options", options::router())
        .nest("/api/buffs", buffs::router())
        .nest("/api/ranking", ranking::router())
        .nest("/api/admin/task", admin::router())
}
