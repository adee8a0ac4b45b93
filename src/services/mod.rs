//! Engine services: accounts, order execution, margin/risk, settlement,
//! options, buffs, and ranking.

mod accounts;
mod buffs;
mod margin;
mod options;
mod orders;
mod ranking;
mod settlement;

pub use accounts::AccountService;
pub use buffs::BuffService;
pub use margin::MarginService;
pub use options::OptionsService;
pub use orders::{OrderRequest, OrderService};
pub use ranking::{RankingEntry, RankingService};
pub use settlement::SettlementService;
