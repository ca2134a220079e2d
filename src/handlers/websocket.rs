//! WebSocket handler for lifecycle event delivery
//!
//! Each connection subscribes one user's private channel; the fan-out
//! component pushes call events through the registered sender.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    models::{WsClientMessage, WsServerMessage},
    AppState,
};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for pushing events to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<WsServerMessage>();

    let mut subscription: Option<(String, String)> = None;

    // Task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<WsClientMessage>(&text) {
                    Ok(WsClientMessage::Subscribe { user_id }) => {
                        if subscription.is_some() {
                            let _ = tx.send(WsServerMessage::Error {
                                code: "ALREADY_SUBSCRIBED".to_string(),
                                message: "Connection already has a subscription".to_string(),
                            });
                            continue;
                        }

                        let connection_id = state.ws_manager.register(&user_id, tx.clone());
                        subscription = Some((user_id.clone(), connection_id));

                        let _ = tx.send(WsServerMessage::Subscribed { user_id });
                    }

                    Ok(WsClientMessage::Ping) => {
                        let _ = tx.send(WsServerMessage::Pong);
                    }

                    Err(e) => {
                        tracing::warn!("Failed to parse WebSocket message: {}", e);
                        let _ = tx.send(WsServerMessage::Error {
                            code: "PARSE_ERROR".to_string(),
                            message: format!("Invalid message format: {}", e),
                        });
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                // Binary messages not supported
            }
            Ok(Message::Ping(_)) => {
                // Handled by the WebSocket library
            }
            Ok(Message::Pong(_)) => {
                // Ignore pongs
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Cleanup
    if let Some((user_id, connection_id)) = subscription {
        state.ws_manager.unregister(&user_id, &connection_id);
    }

    send_task.abort();
}
