use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::rooms::CLIENT_BUFFER;
use crate::types::{ClientMessage, ServerMessage};
use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded channel to this client; a full buffer disconnects it.
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_BUFFER);

    let client_id = state.room_manager.register(tx);
    info!("WebSocket client connected: {}", client_id);

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("Received message from {}: {}", client_id, text);
                handle_message(&state, client_id, &text);
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnecting: {}", client_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by axum
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    state.room_manager.unregister(client_id);
    send_task.abort();
    info!("WebSocket client disconnected: {}", client_id);
}

fn handle_message(state: &AppState, client_id: Uuid, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            send_message(
                state,
                client_id,
                &ServerMessage::Error {
                    error: format!("Invalid message: {}", e),
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { topics } => {
            let subscribed = state.room_manager.subscribe(client_id, &topics);
            debug!("Client {} subscribed to: {:?}", client_id, subscribed);
            send_message(
                state,
                client_id,
                &ServerMessage::Subscribed { topics: subscribed },
            );
        }
        ClientMessage::Unsubscribe { topics } => {
            let unsubscribed = state.room_manager.unsubscribe(client_id, &topics);
            debug!("Client {} unsubscribed from: {:?}", client_id, unsubscribed);
            send_message(
                state,
                client_id,
                &ServerMessage::Unsubscribed {
                    topics: unsubscribed,
                },
            );
        }
    }
}

fn send_message(state: &AppState, client_id: Uuid, msg: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        state.room_manager.send_to(client_id, &json);
    }
}
