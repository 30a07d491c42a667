// WebSocket boundary for detection sessions

use crate::error::SessionError;
use crate::http::AppState;
use crate::protocol::{parse_control, Inbound, Outbound};
use crate::session_loop::{log_session_end, run_session};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!("WebSocket connection established: {}", connection_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let (mut sender, receiver) = socket.split();

    // Outbound messages are written by one task so batches never contend for the socket
    let connection_id_clone = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize WebSocket message: {}", e);
                    continue;
                }
            };

            if let Err(e) = sender.send(Message::Text(json)).await {
                warn!("Failed to send WebSocket message to {}: {}", connection_id_clone, e);
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let id = connection_id.clone();
    let inbound = Box::pin(receiver.filter_map(move |msg| future::ready(decode_message(&id, msg))));

    let result = run_session(&connection_id, inbound, tx, state.session_context()).await;
    log_session_end(&connection_id, &result);

    if let Err(e) = send_task.await {
        warn!("Send task for {} failed: {}", connection_id, e);
    }
    info!("WebSocket connection closed: {}", connection_id);
}

/// Classify one transport message. Keep-alives and bad control text
/// produce nothing.
pub fn decode_message(
    connection_id: &str,
    msg: Result<Message, axum::Error>,
) -> Option<Result<Inbound, SessionError>> {
    match msg {
        Ok(Message::Binary(data)) => Some(Ok(Inbound::Frame(Bytes::from(data)))),
        Ok(Message::Text(text)) => match parse_control(&text) {
            Ok(inbound) => Some(Ok(inbound)),
            Err(e) => {
                warn!("Ignoring control message from {}: {}", connection_id, e);
                None
            }
        },
        Ok(Message::Close(_)) => {
            debug!("WebSocket connection {} closed by client", connection_id);
            Some(Ok(Inbound::Close))
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
    }
}
