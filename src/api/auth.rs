/**
 * Authentication API
 *
 * Session handling is deliberately simple for a game server: a username
 * logs in (creating the account on first sight) and gets back a bearer
 * token for the rest of the API.
 *
 * Flow:
 * 1. POST /api/auth/login - Log in (or register) by username
 * 2. POST /api/auth/logout - Invalidate the current session
 */

use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::request::Parts,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::error::EngineError;
use crate::types::Account;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub account: Account,
}

/// POST /api/auth/login
///
/// Log in by username, creating the account with starting capital on first
/// login.
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, EngineError> {
    let (token, account) = state.accounts.login(&request.username)?;
    Ok(Json(ApiResponse::new(LoginResponse { token, account })))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// POST /api/auth/logout
async fn logout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Json<ApiResponse<LogoutResponse>> {
    state.accounts.logout(&token);
    Json(ApiResponse::new(LogoutResponse { success: true }))
}

/// Authenticated user extractor.
///
/// Use this in route handlers to require authentication:
/// ```ignore
/// async fn my_handler(Authenticated(user_id): Authenticated) { /* ... */ }
/// ```
pub struct Authenticated(pub u64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let app = AppState::from_ref(state);
        let user_id = app
            .accounts
            .resolve_token(&token)
            .ok_or(EngineError::Unauthorized)?;
        Ok(Authenticated(user_id))
    }
}

/// Raw bearer token extractor.
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(EngineError::Unauthorized)?;
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(EngineError::Unauthorized)?;
        Ok(BearerToken(token.to_string()))
    }
}
