//! Synthetic market data: trading calendar, day-path generation, and the
//! quote/tick store.

pub mod clock;
pub mod generator;
mod store;

pub use store::QuoteStore;
