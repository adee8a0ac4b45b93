use serde::{Deserialize, Serialize};

/// Messages sent by WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to topics, e.g. `symbol:AAPL` or `user:42:asset`.
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

/// Messages sent to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        topics: Vec<String>,
    },
    Unsubscribed {
        topics: Vec<String>,
    },
    /// A published event on a subscribed topic.
    Event {
        topic: String,
        payload: serde_json::Value,
    },
    Error {
        error: String,
    },
}
