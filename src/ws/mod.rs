//! WebSocket fan-out: topic rooms and the `/ws` handler.

mod handler;
mod rooms;

pub use handler::ws_handler;
pub use rooms::RoomManager;
