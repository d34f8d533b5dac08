//! Error types for the gateway domain and its persistence layer.
//!
//! Mirrors the split the rest of this codebase draws between a domain-level
//! error enum and a persistence-level one: callers match on `GatewayError`
//! variants to decide what to send back over the socket, while `StoreError`
//! stays an implementation detail of the store module.

use thiserror::Error;

/// Errors produced by the stream registry, runner and dispatcher.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("chat {0} not found")]
    ChatNotFound(String),

    #[error("chat {0} already has an active stream")]
    BusyChat(String),

    #[error("agent service returned {status}: {body}")]
    UpstreamHttpError { status: u16, body: String },

    #[error("agent service transport error: {0}")]
    UpstreamTransportError(String),

    #[error("failed to decode agent response line: {0}")]
    DecodeError(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors produced by the message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
