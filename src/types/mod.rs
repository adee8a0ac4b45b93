//! Domain types shared across the engine.

mod buff;
mod events;
mod market;
mod options;
mod trading;
mod ws;

pub use buff::*;
pub use events::*;
pub use market::*;
pub use options::*;
pub use trading::*;
pub use ws::*;
