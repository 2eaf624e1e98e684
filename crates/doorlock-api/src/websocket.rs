//! WebSocket handler for real-time state updates

use axum::extract::ws::{Message, WebSocket};
use doorlock_core::StateEvent;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;

/// WebSocket events sent to clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Connected { locks: usize },
    /// Some state events were dropped; clients should re-fetch
    Resync { missed: u64 },
}

fn to_text<T: Serialize>(event: &T) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::warn!("Failed to encode WebSocket event: {}", e);
            None
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before greeting so nothing falls between the two
    let mut event_rx = state.manager.subscribe();

    let connected = WsEvent::Connected {
        locks: state.manager.devices().len(),
    };
    if let Some(msg) = to_text(&connected) {
        if sender.send(msg).await.is_err() {
            return;
        }
    }

    // Forward state events to the client
    let send_task = tokio::spawn(async move {
        loop {
            let msg = match event_rx.recv().await {
                Ok(event) => to_text::<StateEvent>(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("WebSocket client lagged by {} events", missed);
                    to_text(&WsEvent::Resync { missed })
                }
                Err(RecvError::Closed) => break,
            };
            if let Some(msg) = msg {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        }
    });

    // Clients only listen; drain until close
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
