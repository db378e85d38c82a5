//! ==============================================================================
//! gateway.rs - per-viewer websocket sessions at /ws
//! ==============================================================================
//!
//! lifecycle:
//!     Open   -> greeting already queued by the bridge (status, snapshot);
//!               a writer task drains the viewer queue into the socket,
//!               the reader loop turns text frames into requests.
//!     Closed -> either half ends, the other is aborted, the viewer is
//!               deregistered. terminal; the browser owns reconnecting.
//!
//! a bad frame never closes the socket. it is logged and skipped.
//!
//! ==============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::api::AppState;
use crate::bridge::{TelemetryBridge, ViewerId, ViewerSession};
use crate::domain::ViewerRequest;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.bridge))
}

async fn handle_socket(socket: WebSocket, bridge: Arc<TelemetryBridge>) {
    let ViewerSession { id, mut events } = bridge.connect_viewer();
    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(viewer = id, error = %e, "could not encode push event");
                    continue;
                }
            };
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let reader_bridge = bridge.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_frame(&reader_bridge, id, &text),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(viewer = id, error = %e, "websocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    bridge.disconnect_viewer(id);
}

/// decode one inbound text frame and hand it to the bridge
pub fn handle_frame(bridge: &TelemetryBridge, id: ViewerId, text: &str) {
    match ViewerRequest::decode(text) {
        Ok(request) => bridge.handle_request(id, request),
        Err(e) => tracing::warn!(viewer = id, error = %e, "ignoring malformed viewer frame"),
    }
}
