//! Typed event publication over WebSocket rooms.
//!
//! Engine services emit state deltas through this bus; it serializes them
//! and fans them out to the matching topic room. Publishing never blocks:
//! slow consumers are handled by the room manager's bounded buffers.

use std::sync::Arc;
use tracing::debug;

use crate::types::{
    AssetChangeEvent, OrderStatusEvent, PositionChangeEvent, QuoteEvent, ServerMessage,
};
use crate::ws::RoomManager;

pub struct EventBus {
    rooms: Arc<RoomManager>,
}

impl EventBus {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self { rooms }
    }

    pub fn asset_topic(user_id: u64) -> String {
        format!("user:{}:asset", user_id)
    }

    pub fn position_topic(user_id: u64) -> String {
        format!("user:{}:position", user_id)
    }

    pub fn order_topic(user_id: u64) -> String {
        format!("user:{}:order", user_id)
    }

    pub fn symbol_topic(code: &str) -> String {
        format!("symbol:{}", code)
    }

    pub fn publish_asset(&self, event: &AssetChangeEvent) {
        debug!(user_id = event.user_id, reason = ?event.reason, "asset change");
        self.publish(&Self::asset_topic(event.user_id), event);
    }

    pub fn publish_position(&self, event: &PositionChangeEvent) {
        self.publish(&Self::position_topic(event.user_id), event);
    }

    pub fn publish_order(&self, event: &OrderStatusEvent) {
        self.publish(&Self::order_topic(event.user_id), event);
    }

    pub fn publish_quote(&self, event: &QuoteEvent) {
        self.publish(&Self::symbol_topic(&event.quote.code), event);
    }

    fn publish<T: serde::Serialize>(&self, topic: &str, payload: &T) {
        let Ok(value) = serde_json::to_value(payload) else {
            return;
        };
        let msg = ServerMessage::Event {
            topic: topic.to_string(),
            payload: value,
        };
        if let Ok(json) = serde_json::to_string(&msg) {
            self.rooms.broadcast(topic, &json);
        }
    }
}
