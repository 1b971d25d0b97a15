// =============================================================================
// WebSocket handler — push-based fleet snapshot updates
// =============================================================================
//
// Clients connect to `/ws?token=<token>` and receive an immediate full
// FleetSnapshot, then an updated snapshot every 500ms whenever the shared
// state version has changed since the last push.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_connection(socket, state)).into_response()
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = uuid::Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = send_snapshot(&mut sender, &state).await {
        warn!(conn = %connection_id, error = %e, "failed to send initial WebSocket snapshot");
        return;
    }
    let mut last_sent_version = state.version.load(std::sync::atomic::Ordering::Relaxed);

    let mut push_interval = interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = push_interval.tick() => {
                let current = state.version.load(std::sync::atomic::Ordering::Relaxed);
                if current != last_sent_version {
                    match send_snapshot(&mut sender, &state).await {
                        Ok(()) => last_sent_version = current,
                        Err(e) => {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket close frame received");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(conn = %connection_id, "WebSocket connection closed");
}

async fn send_snapshot(sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), state: &Arc<AppState>) -> Result<(), axum::Error> {
    state.ws_sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let snapshot = state.build_snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize fleet snapshot");
            Ok(())
        }
    }
}
