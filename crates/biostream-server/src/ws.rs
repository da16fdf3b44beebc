//! WebSocket endpoint for the live sample stream
//!
//! Viewers connect to /api/v1/ws?token=T (or send a Bearer header). The
//! client is registered with the coordinator before the upgrade, so a bad
//! token or a full server is answered with a plain HTTP error and no socket
//! is ever opened.

use crate::api::bearer_token;
use crate::coordinator::ClientId;
use crate::error::ApiError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = params
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string));
    let Some(token) = token else {
        return into_http(ApiError::MissingToken);
    };

    let (link, outbound) = state.coordinator.link();
    let client_id = match state.coordinator.register(token, link).await {
        Ok(Ok(client_id)) => client_id,
        Ok(Err(e)) => return into_http(e.into()),
        Err(e) => return into_http(e.into()),
    };

    ws.on_upgrade(move |socket| handle_ws(socket, state, client_id, outbound))
}

fn into_http(err: ApiError) -> Response {
    let (status, message): (StatusCode, String) = err.into();
    (status, message).into_response()
}

/// Handle an individual WebSocket connection
async fn handle_ws(
    socket: WebSocket,
    state: AppState,
    client_id: ClientId,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Drain the client's queue; the coordinator closing it ends the stream
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "message_encode_failed");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Forward acknowledgements to the coordinator
    let coordinator = state.coordinator.clone();
    let ack_client = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ack { seq, client_time }) => {
                        coordinator.ack(ack_client.clone(), seq, client_time).await;
                    }
                    Err(e) => {
                        tracing::debug!(client = %ack_client, error = %e, "client_message_ignored");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    state.coordinator.unregister(client_id.clone()).await;
    tracing::debug!(client = %client_id, "WebSocket client disconnected");
}
