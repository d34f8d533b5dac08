//! WebSocket upgrade endpoint and per-connection read loop — the Session
//! Dispatcher's entry point (spec.md §4.5).
//!
//! Grounded on the upgrade/split/read-loop shape of the retrieval pack's
//! WebSocket handlers (`realtime/websocket.rs`), simplified to this
//! system's single recognized frame set instead of a binary DAG-CBOR
//! protocol. Authentication is an external collaborator (spec.md §1); this
//! layer trusts the `user_id` the upgrade request carries, the way the rest
//! of this codebase keeps auth out of the streaming core.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::routes::AppState;
use crate::hub::Connection;
use crate::protocol::InboundFrame;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
}

/// `GET /ws?user_id=...` — upgrades to a WebSocket and hands the connection
/// to the per-connection read loop.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query.user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    let (sink, mut stream) = socket.split();
    let connection = Connection::new(user_id.clone(), sink);
    state.hub.connect(connection.clone());
    debug!(user_id = %user_id, connection_id = %connection.id, "connection established");

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %connection.id, error = %e, "websocket read error");
                break;
            }
        };
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => state.dispatcher.handle_frame(&connection, frame).await,
                Err(e) => warn!(connection_id = %connection.id, error = %e, "unrecognized frame, ignoring"),
            },
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    state.hub.disconnect(&connection);
    debug!(user_id = %user_id, connection_id = %connection.id, "connection closed");
}
