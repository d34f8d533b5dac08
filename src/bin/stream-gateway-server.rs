//! Stream gateway server binary.
//!
//! Standalone server hosting the WebSocket chat gateway: connects the
//! Message Store, builds the Stream Registry, Connection Hub and Session
//! Dispatcher, spawns the janitor, and serves the router.

use std::net::SocketAddr;
use std::sync::Arc;

use stream_gateway::api::routes::{create_router, AppState};
use stream_gateway::config::GatewayConfig;
use stream_gateway::dispatcher::SessionDispatcher;
use stream_gateway::hub::ConnectionHub;
use stream_gateway::runner::transport::AgentTransport;
use stream_gateway::store::MessageStore;
use stream_gateway::stream::registry::StreamRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config = Arc::new(GatewayConfig::from_env());
    tracing::info!(
        agent_service_url = %config.agent_service_url,
        session_timeout_secs = config.session_timeout.as_secs(),
        cleanup_interval_secs = config.cleanup_interval.as_secs(),
        "loaded gateway configuration"
    );

    tracing::info!(database_url = %config.database_url, "connecting to message store");
    let store = MessageStore::connect(&config.database_url).await?;
    store.run_migrations().await?;
    store.health_check().await?;
    let store = Arc::new(store);

    let registry = StreamRegistry::new(config.session_timeout);
    registry.spawn_janitor(config.cleanup_interval);
    tracing::info!(
        interval_secs = config.cleanup_interval.as_secs(),
        "janitor spawned"
    );

    let hub = Arc::new(ConnectionHub::new());
    let transport = Arc::new(AgentTransport::new(
        config.agent_service_url.clone(),
        config.upstream_timeout,
    ));
    let dispatcher = Arc::new(SessionDispatcher::new(
        store.clone(),
        registry.clone(),
        hub.clone(),
        transport,
        config.clone(),
    ));

    let state = AppState {
        store,
        registry,
        hub,
        dispatcher,
        config: config.clone(),
    };

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(%addr, "starting stream gateway server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("stream gateway server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received CTRL-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
