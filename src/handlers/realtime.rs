use crate::{handlers::AppState, services::RealtimeBroadcaster};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientFrame {
    Join { room: String },
    Leave { room: String },
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<RealtimeBroadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let (subscriber, mut events) = broadcaster.subscriber();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                match serde_json::to_string(&event) {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to encode realtime event"),
                }
            }

            frame = receiver.next() => {
                let Some(Ok(msg)) = frame else { break };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Join { room }) => broadcaster.join(&room, &subscriber).await,
                        Ok(ClientFrame::Leave { room }) => broadcaster.leave(&room, &subscriber).await,
                        Err(e) => tracing::debug!(error = %e, "Ignoring malformed client frame"),
                    },
                    Message::Close(_) => break,
                    Message::Ping(data) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    broadcaster.leave_all(&subscriber).await;
    tracing::debug!(subscriber = subscriber.id(), "WebSocket connection closed");
}
