//! Route definitions and the shared `AppState` every handler closes over.
//!
//! Grounded on the teacher's `api/routes.rs` (`AppState` + `create_router`
//! shape); generalized here to hold the Stream Registry, Connection Hub and
//! Session Dispatcher this crate's handlers actually need instead of a
//! single `DatabaseConnection`.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::api::handlers;
use crate::api::ws;
use crate::config::GatewayConfig;
use crate::dispatcher::SessionDispatcher;
use crate::hub::ConnectionHub;
use crate::store::MessageStore;
use crate::stream::registry::StreamRegistry;

/// Shared application state, cloned (cheaply, via `Arc`) into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub registry: Arc<StreamRegistry>,
    pub hub: Arc<ConnectionHub>,
    pub dispatcher: Arc<SessionDispatcher>,
    pub config: Arc<GatewayConfig>,
}

/// Build the complete router: the WebSocket upgrade route plus the ambient
/// liveness/health routes (SPEC_FULL.md §B.4).
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .route("/ws", get(ws::websocket_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::transport::AgentTransport;
    use std::time::Duration;

    async fn test_state() -> AppState {
        let store = MessageStore::connect("sqlite::memory:").await.unwrap();
        store.run_migrations().await.unwrap();
        let store = Arc::new(store);
        let config = Arc::new(GatewayConfig::from_env());
        let registry = StreamRegistry::new(config.session_timeout);
        let hub = Arc::new(ConnectionHub::new());
        let transport = Arc::new(AgentTransport::new(
            config.agent_service_url.clone(),
            Duration::from_secs(5),
        ));
        let dispatcher = Arc::new(SessionDispatcher::new(
            store.clone(),
            registry.clone(),
            hub.clone(),
            transport,
            config.clone(),
        ));
        AppState {
            store,
            registry,
            hub,
            dispatcher,
            config,
        }
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let state = test_state().await;
        let _router = create_router(state);
    }
}
