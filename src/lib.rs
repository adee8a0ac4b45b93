//! Bourse - simulated stock/crypto/options trading game engine.
//!
//! The engine generates synthetic market ticks for a fixed set of symbols,
//! executes market and limit orders against those ticks with margin and
//! leverage accounting, performs T+1 cash settlement of sell proceeds, prices
//! and settles options contracts, and pushes state deltas to connected
//! clients over WebSocket.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod market;
pub mod services;
pub mod tasks;
pub mod types;
pub mod ws;

use std::sync::Arc;

use config::Config;
use events::EventBus;
use market::QuoteStore;
use services::{
    AccountService, BuffService, MarginService, OptionsService, OrderService, RankingService,
    SettlementService,
};
use tasks::TaskControl;
use ws::RoomManager;

/// Application state shared across handlers and background loops.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub room_manager: Arc<RoomManager>,
    pub events: Arc<EventBus>,
    pub store: Arc<QuoteStore>,
    pub accounts: Arc<AccountService>,
    pub settlements: Arc<SettlementService>,
    pub buffs: Arc<BuffService>,
    pub orders: Arc<OrderService>,
    pub options: Arc<OptionsService>,
    pub margin: Arc<MarginService>,
    pub ranking: Arc<RankingService>,
    pub tasks: Arc<TaskControl>,
}

impl AppState {
    /// Wire up all engine services from a configuration.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let room_manager = RoomManager::new();
        let events = Arc::new(EventBus::new(room_manager.clone()));
        let store = Arc::new(QuoteStore::new());
        let accounts = Arc::new(AccountService::new(config.clone()));
        let settlements = Arc::new(SettlementService::new(
            accounts.clone(),
            store.clone(),
            events.clone(),
        ));
        let buffs = Arc::new(BuffService::new(
            accounts.clone(),
            store.clone(),
            settlements.clone(),
            events.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            config.clone(),
            accounts.clone(),
            store.clone(),
            settlements.clone(),
            buffs.clone(),
            events.clone(),
        ));
        let options = Arc::new(OptionsService::new(
            config.clone(),
            accounts.clone(),
            store.clone(),
            settlements.clone(),
            events.clone(),
        ));
        let margin = Arc::new(MarginService::new(
            config.clone(),
            accounts.clone(),
            store.clone(),
            settlements.clone(),
            orders.clone(),
            options.clone(),
            events.clone(),
        ));
        let ranking = Arc::new(RankingService::new(
            accounts.clone(),
            store.clone(),
            settlements.clone(),
        ));
        let tasks = Arc::new(TaskControl::new());

        Self {
            config,
            room_manager,
            events,
            store,
            accounts,
            settlements,
            buffs,
            orders,
            options,
            margin,
            ranking,
            tasks,
        }
    }
}
