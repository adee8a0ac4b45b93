use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Per-client outbound buffer size. A client that cannot drain this many
/// messages is disconnected; it reconciles by refetching snapshots on
/// reconnect.
pub const CLIENT_BUFFER: usize = 256;

/// A client's subscription information.
pub struct ClientSubscription {
    /// Subscribed topic names.
    pub topics: HashSet<String>,
    /// Bounded channel to the client's send task.
    pub tx: mpsc::Sender<String>,
}

/// Manages WebSocket client subscriptions.
///
/// Topics are plain strings: `symbol:{code}` for quote pushes and
/// `user:{id}:{asset|position|order}` for per-user state deltas.
pub struct RoomManager {
    /// Client subscriptions keyed by client ID.
    pub clients: DashMap<Uuid, ClientSubscription>,
    /// Rooms: topic -> set of client IDs.
    rooms: DashMap<String, HashSet<Uuid>>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
        })
    }

    /// Register a new client.
    pub fn register(&self, tx: mpsc::Sender<String>) -> Uuid {
        let client_id = Uuid::new_v4();
        self.clients.insert(
            client_id,
            ClientSubscription {
                topics: HashSet::new(),
                tx,
            },
        );
        client_id
    }

    /// Unregister a client and remove it from all rooms.
    pub fn unregister(&self, client_id: Uuid) {
        if let Some((_, subscription)) = self.clients.remove(&client_id) {
            for topic in subscription.topics {
                if let Some(mut room) = self.rooms.get_mut(&topic) {
                    room.remove(&client_id);
                }
            }
        }
    }

    /// Subscribe a client to topics. Returns the topics newly subscribed.
    pub fn subscribe(&self, client_id: Uuid, topics: &[String]) -> Vec<String> {
        let mut subscribed = Vec::new();

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for topic in topics {
                if client.topics.insert(topic.clone()) {
                    subscribed.push(topic.clone());

                    self.rooms
                        .entry(topic.clone())
                        .or_insert_with(HashSet::new)
                        .insert(client_id);
                }
            }
        }

        subscribed
    }

    /// Unsubscribe a client from topics. Returns the topics removed.
    pub fn unsubscribe(&self, client_id: Uuid, topics: &[String]) -> Vec<String> {
        let mut unsubscribed = Vec::new();

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for topic in topics {
                if client.topics.remove(topic) {
                    unsubscribed.push(topic.clone());

                    if let Some(mut room) = self.rooms.get_mut(topic) {
                        room.remove(&client_id);
                    }
                }
            }
        }

        unsubscribed
    }

    /// Broadcast a message to all clients in a topic room.
    ///
    /// Uses `try_send` so a publisher never blocks on a slow consumer; a
    /// client whose buffer is full is dropped from the room manager.
    pub fn broadcast(&self, topic: &str, message: &str) {
        let client_ids: Vec<Uuid> = self
            .rooms
            .get(topic)
            .map(|room| room.iter().copied().collect())
            .unwrap_or_default();

        let mut overflowed = Vec::new();
        for id in client_ids {
            if let Some(client) = self.clients.get(&id) {
                match client.tx.try_send(message.to_string()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => overflowed.push(id),
                    Err(mpsc::error::TrySendError::Closed(_)) => overflowed.push(id),
                }
            }
        }

        for id in overflowed {
            warn!("dropping slow websocket client {}", id);
            self.unregister(id);
        }
    }

    /// Send a message to one client.
    pub fn send_to(&self, client_id: Uuid, message: &str) {
        if let Some(client) = self.clients.get(&client_id) {
            let _ = client.tx.try_send(message.to_string());
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of topics with at least one subscriber.
    pub fn room_count(&self) -> usize {
        self.rooms.iter().filter(|r| !r.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let rooms = RoomManager::new();
        let (tx, mut rx) = mpsc::channel(CLIENT_BUFFER);
        let id = rooms.register(tx);

        let subscribed = rooms.subscribe(id, &["symbol:AAPL".to_string()]);
        assert_eq!(subscribed, vec!["symbol:AAPL".to_string()]);

        rooms.broadcast("symbol:AAPL", "tick");
        assert_eq!(rx.recv().await.unwrap(), "tick");
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_is_noop() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::channel(CLIENT_BUFFER);
        let id = rooms.register(tx);

        rooms.subscribe(id, &["user:1:asset".to_string()]);
        let again = rooms.subscribe(id, &["user:1:asset".to_string()]);
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_disconnects_client() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::channel(2);
        let id = rooms.register(tx);
        rooms.subscribe(id, &["symbol:AAPL".to_string()]);

        for _ in 0..3 {
            rooms.broadcast("symbol:AAPL", "tick");
        }

        assert_eq!(rooms.client_count(), 0);
    }

    #[tokio::test]
    async fn test_unregister_clears_rooms() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::channel(CLIENT_BUFFER);
        let id = rooms.register(tx);
        rooms.subscribe(id, &["symbol:AAPL".to_string()]);

        rooms.unregister(id);
        assert_eq!(rooms.client_count(), 0);
        assert_eq!(rooms.room_count(), 0);
    }
}
