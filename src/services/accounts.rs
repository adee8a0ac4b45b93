//! Account and position store, session tokens, and the per-user locks that
//! serialize every balance/position mutation.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::types::{Account, Position};

pub struct AccountService {
    config: Arc<Config>,
    accounts: DashMap<u64, Account>,
    /// user_id -> symbol_id -> position
    positions: DashMap<u64, HashMap<u64, Position>>,
    /// Keyed mutex map. Any engine path that mutates a user's balance or
    /// positions must hold this lock for the duration of the mutation.
    locks: DashMap<u64, Arc<Mutex<()>>>,
    /// Session token -> user id.
    sessions: DashMap<String, u64>,
    by_username: DashMap<String, u64>,
    next_user_id: AtomicU64,
}

impl AccountService {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            accounts: DashMap::new(),
            positions: DashMap::new(),
            locks: DashMap::new(),
            sessions: DashMap::new(),
            by_username: DashMap::new(),
            next_user_id: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Log a user in by name, creating the account on first sight.
    /// Returns the session token and the account snapshot.
    pub fn login(&self, username: &str) -> Result<(String, Account)> {
        let username = username.trim();
        if username.is_empty() || username.len() > 32 {
            return Err(EngineError::Validation(
                "username must be 1-32 characters".to_string(),
            ));
        }

        let user_id = match self.by_username.get(username) {
            Some(id) => *id,
            None => {
                let id = self.next_user_id.fetch_add(1, Ordering::SeqCst);
                let account = Account {
                    user_id: id,
                    username: username.to_string(),
                    balance: self.config.initial_balance,
                    frozen_balance: Decimal::ZERO,
                    margin_loan_principal: Decimal::ZERO,
                    margin_interest_accrued: Decimal::ZERO,
                    bankrupt: false,
                    bankrupt_count: 0,
                    bankrupt_reset_date: None,
                    initial_balance: self.config.initial_balance,
                    created_at: Utc::now().naive_utc(),
                };
                self.accounts.insert(id, account);
                self.by_username.insert(username.to_string(), id);
                info!(user_id = id, username, "created account");
                id
            }
        };

        let token = Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), user_id);
        let account = self.account(user_id)?;
        Ok((token, account))
    }

    pub fn logout(&self, token: &str) {
        self.sessions.remove(token);
    }

    pub fn resolve_token(&self, token: &str) -> Option<u64> {
        self.sessions.get(token).map(|id| *id)
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// The mutation lock for a user. Callers hold the guard across the whole
    /// read-validate-commit sequence.
    pub fn lock(&self, user_id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    pub fn account(&self, user_id: u64) -> Result<Account> {
        self.accounts
            .get(&user_id)
            .map(|a| a.clone())
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))
    }

    /// Mutate an account in place. Caller must hold the user lock.
    pub fn modify<R>(&self, user_id: u64, f: impl FnOnce(&mut Account) -> R) -> Result<R> {
        let mut account = self
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))?;
        Ok(f(&mut account))
    }

    pub fn user_ids(&self) -> Vec<u64> {
        self.accounts.iter().map(|a| *a.key()).collect()
    }

    // ------------------------------------------------------------------
    // Positions (caller holds the user lock for mutation)
    // ------------------------------------------------------------------

    pub fn position(&self, user_id: u64, symbol_id: u64) -> Option<Position> {
        self.positions
            .get(&user_id)
            .and_then(|m| m.get(&symbol_id).cloned())
    }

    pub fn positions(&self, user_id: u64) -> Vec<Position> {
        self.positions
            .get(&user_id)
            .map(|m| {
                let mut all: Vec<Position> = m.values().cloned().collect();
                all.sort_by_key(|p| p.symbol_id);
                all
            })
            .unwrap_or_default()
    }

    /// Add quantity at a price, creating the position and rolling the
    /// average cost.
    pub fn add_to_position(&self, user_id: u64, symbol_id: u64, quantity: Decimal, price: Decimal) {
        let mut user_positions = self.positions.entry(user_id).or_default();
        let position = user_positions.entry(symbol_id).or_insert_with(|| Position {
            user_id,
            symbol_id,
            quantity: Decimal::ZERO,
            frozen_quantity: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
        });

        let old_cost = position.avg_cost * position.quantity;
        position.quantity += quantity;
        if position.quantity > Decimal::ZERO {
            position.avg_cost = ((old_cost + price * quantity) / position.quantity)
                .round_dp_with_strategy(4, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
        }
    }

    /// Mutate an existing position; the entry is removed when both quantity
    /// and frozen quantity reach zero. Returns the resulting position, or
    /// `None` if it was removed (or never existed).
    pub fn modify_position(
        &self,
        user_id: u64,
        symbol_id: u64,
        f: impl FnOnce(&mut Position),
    ) -> Option<Position> {
        let mut user_positions = self.positions.get_mut(&user_id)?;
        let position = user_positions.get_mut(&symbol_id)?;
        f(position);

        if position.quantity.is_zero() && position.frozen_quantity.is_zero() {
            user_positions.remove(&symbol_id);
            None
        } else {
            user_positions.get(&symbol_id).cloned()
        }
    }

    /// Remove and return every position a user holds (forced liquidation).
    pub fn clear_positions(&self, user_id: u64) -> Vec<Position> {
        self.positions
            .remove(&user_id)
            .map(|(_, m)| m.into_values().collect())
            .unwrap_or_default()
    }
}
