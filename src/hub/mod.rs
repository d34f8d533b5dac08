//! Connection Hub: live WebSocket membership and per-socket write
//! serialization.
//!
//! Grounded on the connection-pool shape used for the WebSocket API
//! elsewhere in this codebase, generalized here to hold the actual socket
//! sink (rather than bookkeeping metadata only) behind a per-connection
//! lock, and indexed by user_id the way the reference `ConnectionManager`
//! indexes its `user_connections` map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::protocol::OutboundFrame;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("connection closed")]
    Closed,
    #[error("socket send failed: {0}")]
    Send(#[from] axum::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One live WebSocket connection.
pub struct Connection {
    pub id: Uuid,
    pub user_id: String,
    writer: AsyncMutex<SplitSink<WebSocket, WsMessage>>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(user_id: String, writer: SplitSink<WebSocket, WsMessage>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            writer: AsyncMutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }

    /// Encode and transmit one frame. Serializes with every other `send`
    /// on this connection; never interleaves bytes.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), HubError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::Closed);
        }
        let text = serde_json::to_string(frame)?;
        let mut guard = self.writer.lock().await;
        guard.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Process-wide registry of live connections, indexed by user_id.
#[derive(Default)]
pub struct ConnectionHub {
    by_user: DashMap<String, Vec<Arc<Connection>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
        }
    }

    pub fn connect(&self, connection: Arc<Connection>) {
        self.by_user
            .entry(connection.user_id.clone())
            .or_default()
            .push(connection);
    }

    pub fn disconnect(&self, connection: &Arc<Connection>) {
        connection.mark_closed();
        if let Some(mut entry) = self.by_user.get_mut(&connection.user_id) {
            entry.retain(|c| c.id != connection.id);
        }
    }

    /// Snapshot of currently-registered connections for a user, used by the
    /// admin co-subscribe rule.
    pub fn lookup_user_connections(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.by_user
            .get(user_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn active_connection_count(&self) -> usize {
        self.by_user.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_missing_user_is_empty() {
        let hub = ConnectionHub::new();
        assert!(hub.lookup_user_connections("nobody").is_empty());
    }
}
