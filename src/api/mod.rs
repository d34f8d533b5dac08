//! HTTP/WebSocket surface: the thin ambient layer that wires the Connection
//! Hub, Session Dispatcher, Stream Registry and Message Store into an axum
//! `Router`, grounded on the teacher's `api/routes.rs` + `api/ws/handler.rs`
//! split.

pub mod handlers;
pub mod routes;
pub mod ws;
