//! Stream Runner: the per-stream task that drives the Agent Transport,
//! parses the wire format, and pushes updates into its Stream State
//! (spec.md §4.3).
//!
//! Grounded on the teacher's `executor/llm_executor.rs` (retry-free single
//! request/response shape) and `executor/streaming.rs` (an update sender
//! pushed to as a response streams in); generalized here to drive a raw
//! SSE-like body instead of a `ChatModel::stream` call, and to own the
//! persistence side effects spec.md §4.3 assigns to the Runner rather than
//! to the Stream State.

pub mod transport;
pub mod wire;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::store::MessageStore;
use crate::stream::state::StreamState;
use transport::{AgentRequest, AgentTransport};
use wire::{decode_line, LineBuffer, WireLine};

/// Upstream error bodies are logged and surfaced verbatim but capped so a
/// misbehaving backend cannot blow up an `error` frame's size.
const ERROR_BODY_TRUNCATE_CHARS: usize = 2000;

pub struct StreamRunner;

impl StreamRunner {
    /// Spawn the task that drives one stream to completion. The caller is
    /// expected to store the returned handle on the Stream State via
    /// `set_runner_handle` (spec.md §4.1's `runner_handle` attribute).
    pub fn spawn(
        state: Arc<StreamState>,
        store: Arc<MessageStore>,
        transport: Arc<AgentTransport>,
        request: AgentRequest,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::run(&state, &store, &transport, request).await;
        })
    }

    async fn run(
        state: &Arc<StreamState>,
        store: &Arc<MessageStore>,
        transport: &Arc<AgentTransport>,
        request: AgentRequest,
    ) {
        let response = match transport.stream(&request).await {
            Ok(response) => response,
            Err(e) => {
                let err = GatewayError::UpstreamTransportError(format!("agent service request failed: {e}"));
                warn!(stream_id = %state.stream_id, error = %err, "agent transport error");
                state.mark_error(err.to_string()).await;
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let body = truncate_chars(&body, ERROR_BODY_TRUNCATE_CHARS);
            let err = GatewayError::UpstreamHttpError { status, body };
            warn!(stream_id = %state.stream_id, status, "agent service returned non-200");
            state.mark_error(err.to_string()).await;
            return;
        }

        let mut body = response.bytes_stream();
        let mut buffer = LineBuffer::new();

        'read: while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err = GatewayError::UpstreamTransportError(e.to_string());
                    warn!(stream_id = %state.stream_id, error = %err, "agent transport read error");
                    state.mark_error(err.to_string()).await;
                    return;
                }
            };

            for line in buffer.push(&bytes) {
                // Cooperative cancellation point: checked at least once per
                // inbound chunk, per spec.md §9's cancellation contract.
                if state.is_cancelled() {
                    break 'read;
                }
                match decode_line(&line) {
                    Ok(WireLine::Ignore) => {}
                    Ok(WireLine::Meta(text)) => {
                        state.append_meta(&text).await;
                        if let Err(e) = store.append_chat_meta_info(&state.chat_id, &text).await {
                            error!(chat_id = %state.chat_id, error = %e, "failed to persist meta_info");
                        }
                    }
                    Ok(WireLine::Data { content, finish }) => {
                        if let Some(content) = content.filter(|c| !c.is_empty()) {
                            state.append_chunk(&content).await;
                        }
                        if finish {
                            // Meta-info lines after finish_reason == "stop"
                            // are discarded (spec.md §4.3 edge cases): this
                            // break leaves the rest of the body unread.
                            break 'read;
                        }
                    }
                    Ok(WireLine::Error(message)) => {
                        warn!(stream_id = %state.stream_id, %message, "agent reported a terminal error");
                        state.mark_error(message).await;
                        return;
                    }
                    Err(e) => {
                        warn!(stream_id = %state.stream_id, error = %e, "failed to decode agent response line");
                        state.mark_error(e.to_string()).await;
                        return;
                    }
                }
            }
        }

        if state.is_cancelled() {
            Self::persist_partial(state, store).await;
            debug!(stream_id = %state.stream_id, "runner stopped on cancellation");
            return;
        }

        // Any clean exit from the read loop above — an explicit finish
        // signal or the upstream simply closing its socket after the last
        // chunk — is success (spec.md §4.3 step 5). The original's
        // `break` on `finish_reason` only exits its inner line-processing
        // loop, not the outer response loop, so it persists unconditionally
        // on a clean connection close too; a stream is only ever errored
        // via one of the explicit branches above.
        let content = state.accumulated_content().await;
        if content.is_empty() {
            debug!(stream_id = %state.stream_id, "stream completed with no content, skipping persist");
        } else if let Err(e) = store.append_assistant_message(&state.chat_id, &content).await {
            error!(chat_id = %state.chat_id, error = %e, "failed to persist final assistant message");
        }
        if let Err(e) = store.touch_chat_activity(&state.chat_id).await {
            error!(chat_id = %state.chat_id, error = %e, "failed to bump chat last-activity");
        }
        info!(stream_id = %state.stream_id, chat_id = %state.chat_id, "stream completed");
        state.mark_complete().await;
    }

    /// Persist whatever content accumulated before a `stop` frame landed.
    /// The stream's status transitioned to Cancelled synchronously when
    /// `cancel()` was invoked; this only needs to persist the partial
    /// transcript. Database failures here are logged, not escalated — the
    /// in-memory transcript stays available to subscribers until reaped
    /// (spec.md §7, `PersistError`).
    async fn persist_partial(state: &Arc<StreamState>, store: &Arc<MessageStore>) {
        let content = state.accumulated_content().await;
        if let Err(e) = store.append_assistant_message(&state.chat_id, &content).await {
            error!(chat_id = %state.chat_id, error = %e, "failed to persist partial assistant message on cancel");
        }
    }
}

fn truncate_chars(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        body.to_string()
    } else {
        let truncated: String = body.chars().take(max).collect();
        format!("{truncated}... (truncated)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageStore;
    use crate::stream::state::StreamState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Spawn a minimal hand-rolled HTTP/1.1 server that writes a fixed
    /// response body for every connection; used in lieu of a mocking crate
    /// the teacher's stack does not depend on (SPEC_FULL.md §A.4).
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut discard = [0u8; 4096];
            let _ = socket.read(&mut discard).await;
            let response = format!(
                "{status_line}\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn memory_store() -> Arc<MessageStore> {
        let store = MessageStore::connect("sqlite::memory:").await.unwrap();
        store.run_migrations().await.unwrap();
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES ('u1', 'u1@example.com', '2026-01-01T00:00:00Z')")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, meta_info, created_at, updated_at) VALUES ('c1', 'u1', '', '', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        Arc::new(store)
    }

    fn sample_request() -> AgentRequest {
        AgentRequest::new(vec![], String::new(), "u1".to_string(), vec![], serde_json::json!({}), None)
    }

    #[tokio::test]
    async fn happy_path_persists_and_completes() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\
                     data: [DONE]\n";
        let url = serve_once("HTTP/1.1 200 OK", body).await;
        let store = memory_store().await;
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        let transport = Arc::new(AgentTransport::new(url, std::time::Duration::from_secs(5)));

        StreamRunner::run(&state, &store, &transport, sample_request()).await;

        assert_eq!(state.accumulated_content().await, "hello");
        assert_eq!(state.status().await, crate::stream::state::StreamStatus::Completed);
        let history = store.load_history("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[0].role, "assistant");
    }

    #[tokio::test]
    async fn eof_without_finish_signal_still_completes() {
        // The upstream writes content then closes the socket without ever
        // sending `data: [DONE]` or a `finish_reason == "stop"` delta — a
        // common real-world SSE pattern. A clean connection close with no
        // transport/decode/HTTP error is success, not `Errored`.
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n";
        let url = serve_once("HTTP/1.1 200 OK", body).await;
        let store = memory_store().await;
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        let transport = Arc::new(AgentTransport::new(url, std::time::Duration::from_secs(5)));

        StreamRunner::run(&state, &store, &transport, sample_request()).await;

        assert_eq!(state.accumulated_content().await, "hi");
        assert_eq!(state.status().await, crate::stream::state::StreamStatus::Completed);
        let history = store.load_history("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn upstream_http_error_marks_errored_without_persisting() {
        let url = serve_once("HTTP/1.1 500 Internal Server Error", "boom").await;
        let store = memory_store().await;
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        let transport = Arc::new(AgentTransport::new(url, std::time::Duration::from_secs(5)));

        StreamRunner::run(&state, &store, &transport, sample_request()).await;

        assert_eq!(state.status().await, crate::stream::state::StreamStatus::Errored);
        let history = store.load_history("c1").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn cancellation_persists_partial_content() {
        // Simulates a `stop` frame landing after "he" already streamed in:
        // the runner's cooperative check fires on the next inbound line and
        // the rest of the body ("llo") must never be appended.
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n";
        let url = serve_once("HTTP/1.1 200 OK", body).await;
        let store = memory_store().await;
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        state.append_chunk("he").await;
        state.cancel().await;
        let transport = Arc::new(AgentTransport::new(url, std::time::Duration::from_secs(5)));

        StreamRunner::run(&state, &store, &transport, sample_request()).await;

        assert_eq!(state.status().await, crate::stream::state::StreamStatus::Cancelled);
        assert_eq!(state.accumulated_content().await, "he");
        let history = store.load_history("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "he");
    }
}
