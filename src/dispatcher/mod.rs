//! Session Dispatcher: the per-connection read loop's frame router
//! (spec.md §4.5).
//!
//! Grounded on the dominant control-flow path spec.md §1 and §4.5 spell
//! out directly: persist → load → create → launch → subscribe. The admin
//! co-subscribe check stays at this layer rather than threaded into the
//! Registry or Stream State, per spec.md's explicit redesign note, the
//! same way the rest of this codebase keeps authorization checks at the
//! handler boundary rather than in its storage or execution layers.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::hub::{Connection, ConnectionHub};
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::runner::transport::{AgentRequest, AgentTransport, HistoryMessage};
use crate::runner::StreamRunner;
use crate::store::MessageStore;
use crate::stream::registry::StreamRegistry;

/// Routes decoded client frames to the Registry, Message Store and Stream
/// Runner. One instance is shared by every connection's read loop.
pub struct SessionDispatcher {
    store: Arc<MessageStore>,
    registry: Arc<StreamRegistry>,
    hub: Arc<ConnectionHub>,
    transport: Arc<AgentTransport>,
    config: Arc<GatewayConfig>,
}

impl SessionDispatcher {
    pub fn new(
        store: Arc<MessageStore>,
        registry: Arc<StreamRegistry>,
        hub: Arc<ConnectionHub>,
        transport: Arc<AgentTransport>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            transport,
            config,
        }
    }

    /// Decode and route one inbound frame. Unknown frame types never reach
    /// here; `serde`'s tagged enum rejects them at decode time, so the
    /// caller logs and drops those before calling in.
    pub async fn handle_frame(&self, connection: &Arc<Connection>, frame: InboundFrame) {
        match frame {
            InboundFrame::Message {
                chat_id,
                content,
                model,
                meta_info,
                enabled_tools,
            } => {
                self.handle_message(connection, chat_id, content, model, meta_info, enabled_tools)
                    .await
            }
            InboundFrame::Subscribe { chat_id, stream_id } => {
                self.handle_subscribe(connection, chat_id, stream_id).await
            }
            InboundFrame::Stop { chat_id, stream_id } => {
                self.handle_stop(chat_id, stream_id).await
            }
            InboundFrame::Ping => {
                let _ = connection.send(&OutboundFrame::Pong).await;
            }
            InboundFrame::McpToolResult { request_id, .. } => {
                // Side-channel routing to the agent-service integration is
                // out of scope for this core; just note it arrived.
                debug!(%request_id, "mcp_tool_result received, no side channel wired");
            }
        }
    }

    async fn handle_message(
        &self,
        connection: &Arc<Connection>,
        chat_id: String,
        content: String,
        model: Option<String>,
        meta_info: Option<String>,
        enabled_tools: Option<Value>,
    ) {
        let chat = match self.store.get_chat(&chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                let err = GatewayError::ChatNotFound(chat_id.clone());
                self.send_error(connection, err.to_string(), None, Some(chat_id))
                    .await;
                return;
            }
            Err(e) => {
                error!(%chat_id, error = %e, "failed to load chat");
                self.send_error(connection, "failed to load chat", None, Some(chat_id))
                    .await;
                return;
            }
        };

        if chat.user_id != connection.user_id && !self.config.is_admin(&connection.user_id) {
            // An admin identity may send into any chat; everyone else is
            // told the chat doesn't exist rather than that it isn't theirs.
            let err = GatewayError::ChatNotFound(chat_id.clone());
            self.send_error(connection, err.to_string(), None, Some(chat_id))
                .await;
            return;
        }

        let user_message = match self.store.append_user_message(&chat_id, &content).await {
            Ok(message) => message,
            Err(e) => {
                error!(%chat_id, error = %e, "failed to persist user message");
                self.send_error(connection, "failed to persist message", None, Some(chat_id))
                    .await;
                return;
            }
        };

        let echo = OutboundFrame::Message {
            id: user_message.id.clone(),
            role: "user",
            content: user_message.content.clone(),
            created_at: user_message.created_at.clone(),
            chat_id: chat_id.clone(),
        };
        let _ = connection.send(&echo).await;

        let (history, mcp_servers) = tokio::join!(
            self.store.load_history(&chat_id),
            self.store.list_enabled_mcp_servers(&chat.user_id)
        );

        let history = match history {
            Ok(history) => history,
            Err(e) => {
                error!(%chat_id, error = %e, "failed to load conversation history");
                self.send_error(connection, "failed to load history", None, Some(chat_id))
                    .await;
                return;
            }
        };

        let mcp_servers = match mcp_servers {
            Ok(servers) => servers.into_iter().map(|s| s.name).collect(),
            Err(e) => {
                warn!(user_id = %chat.user_id, error = %e, "failed to load mcp servers, continuing without them");
                Vec::new()
            }
        };

        let messages = history.iter().map(HistoryMessage::from).collect();
        let request = AgentRequest::new(
            messages,
            meta_info.unwrap_or_default(),
            connection.user_id.clone(),
            mcp_servers,
            enabled_tools.unwrap_or_else(|| serde_json::json!({})),
            model,
        );

        let stream_id = format!("stream-{chat_id}-{}", Utc::now().timestamp_millis());

        let state = match self.registry.create(stream_id, chat_id.clone(), chat.user_id.clone()) {
            Ok(state) => state,
            Err(err @ GatewayError::BusyChat(_)) => {
                let message = err.to_string();
                self.send_error(connection, message, None, Some(chat_id))
                    .await;
                return;
            }
            Err(e) => {
                error!(%chat_id, error = %e, "unexpected error creating stream");
                self.send_error(connection, "failed to start stream", None, Some(chat_id))
                    .await;
                return;
            }
        };

        let handle = StreamRunner::spawn(state.clone(), self.store.clone(), self.transport.clone(), request);
        state.set_runner_handle(handle).await;

        state.subscribe(connection.clone()).await;

        if chat.user_id != connection.user_id {
            for owner_connection in self.hub.lookup_user_connections(&chat.user_id) {
                state.subscribe(owner_connection).await;
            }
        }
    }

    async fn handle_subscribe(
        &self,
        connection: &Arc<Connection>,
        chat_id: Option<String>,
        stream_id: Option<String>,
    ) {
        let state = if let Some(stream_id) = &stream_id {
            self.registry.get(stream_id)
        } else if let Some(chat_id) = &chat_id {
            self.registry.active_for_chat(chat_id)
        } else {
            None
        };

        let Some(state) = state else {
            let chat_id = chat_id.or(stream_id).unwrap_or_default();
            let _ = connection
                .send(&OutboundFrame::NoActiveStream { chat_id })
                .await;
            return;
        };

        // subscribe() reports whether it delivered a terminal frame during
        // backfill in the same critical section that checked status, so
        // there's no gap between "is it still running" and "subscribe".
        let delivered_terminal_frame = state.subscribe(connection.clone()).await;
        if !delivered_terminal_frame {
            let confirmed = OutboundFrame::SubscriptionConfirmed {
                stream_id: state.stream_id.clone(),
                chat_id: state.chat_id.clone(),
            };
            let _ = connection.send(&confirmed).await;
        }
    }

    async fn handle_stop(&self, chat_id: Option<String>, stream_id: Option<String>) {
        let stream_id = match stream_id {
            Some(stream_id) => Some(stream_id),
            None => chat_id
                .as_deref()
                .and_then(|chat_id| self.registry.active_for_chat(chat_id))
                .map(|state| state.stream_id.clone()),
        };

        if let Some(stream_id) = stream_id {
            self.registry.cancel(&stream_id).await;
        }
    }

    async fn send_error(
        &self,
        connection: &Arc<Connection>,
        message: impl Into<String>,
        stream_id: Option<String>,
        chat_id: Option<String>,
    ) {
        let frame = OutboundFrame::Error {
            message: message.into(),
            stream_id,
            chat_id,
        };
        let _ = connection.send(&frame).await;
    }
}

// Exercising a full `message`/`subscribe`/`stop` round trip needs a live
// `Connection`, which in turn needs a real WebSocket upgrade — that's set
// up once in the api module's integration tests rather than faked here.
