//! Leaderboard aggregation.
//!
//! Periodically snapshots every account's total assets and keeps the top 50,
//! sorted by total assets descending with user id as the tie-break.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::RwLock;
use tracing::debug;

use super::{AccountService, SettlementService};
use crate::market::QuoteStore;

const LEADERBOARD_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub user_id: u64,
    pub username: String,
    pub total_assets: Decimal,
    pub profit_pct: Decimal,
    pub bankrupt_count: u32,
}

pub struct RankingService {
    accounts: Arc<AccountService>,
    #[allow(dead_code)]
    store: Arc<QuoteStore>,
    settlements: Arc<SettlementService>,
    snapshot: RwLock<Vec<RankingEntry>>,
}

impl RankingService {
    pub fn new(
        accounts: Arc<AccountService>,
        store: Arc<QuoteStore>,
        settlements: Arc<SettlementService>,
    ) -> Self {
        Self {
            accounts,
            store,
            settlements,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// Recompute the leaderboard from live account state.
    pub fn refresh(&self) {
        let mut entries: Vec<RankingEntry> = Vec::new();
        for user_id in self.accounts.user_ids() {
            let Ok(account) = self.accounts.account(user_id) else {
                continue;
            };
            let Ok(snapshot) = self
                .settlements
                .build_asset_event(user_id, crate::types::AssetChangeReason::SettlementCompleted)
            else {
                continue;
            };
            let profit_pct = if account.initial_balance.is_zero() {
                Decimal::ZERO
            } else {
                ((snapshot.total_assets - account.initial_balance) / account.initial_balance
                    * Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            };
            entries.push(RankingEntry {
                rank: 0,
                user_id,
                username: account.username.clone(),
                total_assets: snapshot.total_assets,
                profit_pct,
                bankrupt_count: account.bankrupt_count,
            });
        }

        entries.sort_by(|a, b| {
            b.total_assets
                .cmp(&a.total_assets)
                .then(a.user_id.cmp(&b.user_id))
        });
        entries.truncate(LEADERBOARD_SIZE);
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }

        debug!(entries = entries.len(), "leaderboard refreshed");
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    /// Current leaderboard; empty until the first refresh.
    pub fn leaderboard(&self) -> Vec<RankingEntry> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
