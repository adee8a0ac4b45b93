use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

/// Engine error taxonomy.
///
/// Every error surfaced at the API boundary carries a stable machine code so
/// clients can branch without parsing messages.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Insufficient position: requested {requested}, available {available}")]
    InsufficientPosition {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Market is closed")]
    MarketClosed,

    #[error("Account is bankrupt until {0}")]
    AccountBankrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Leverage and discount buff cannot be combined")]
    ConflictingModifiers,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::InsufficientPosition { .. } => "INSUFFICIENT_POSITION",
            EngineError::MarketClosed => "MARKET_CLOSED",
            EngineError::AccountBankrupt(_) => "ACCOUNT_BANKRUPT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            EngineError::ConflictingModifiers => "CONFLICTING_MODIFIERS",
            EngineError::Unauthorized => "UNAUTHORIZED",
            EngineError::Forbidden => "FORBIDDEN",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Validation(_)
            | EngineError::InsufficientFunds { .. }
            | EngineError::InsufficientPosition { .. }
            | EngineError::ConflictingModifiers
            | EngineError::InvalidStateTransition(_) => StatusCode::BAD_REQUEST,
            EngineError::MarketClosed | EngineError::AccountBankrupt(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden => StatusCode::FORBIDDEN,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
