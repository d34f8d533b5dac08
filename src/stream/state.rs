//! Stream State: the in-memory record of one in-flight agent response.
//!
//! Grounded on the accumulator/subscriber-set shape of the original
//! `StreamState`, reworked around a per-instance async lock so that
//! notification sends (which may suspend on a subscriber's writer lock or
//! socket backpressure) can happen inside the same critical section that
//! mutates content — the ordering guarantee (I5) depends on that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hub::Connection;
use crate::protocol::OutboundFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Running,
    Completed,
    Errored,
    Cancelled,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamStatus::Running)
    }

    fn to_tag(self) -> u8 {
        match self {
            StreamStatus::Running => 0,
            StreamStatus::Completed => 1,
            StreamStatus::Errored => 2,
            StreamStatus::Cancelled => 3,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => StreamStatus::Completed,
            2 => StreamStatus::Errored,
            3 => StreamStatus::Cancelled,
            _ => StreamStatus::Running,
        }
    }
}

struct Inner {
    accumulated_content: String,
    meta_info: Vec<String>,
    subscribers: HashMap<Uuid, Arc<Connection>>,
    status: StreamStatus,
    error_text: Option<String>,
    end_time: Option<DateTime<Utc>>,
    runner_handle: Option<JoinHandle<()>>,
}

/// One agent response, from creation to a terminal transition.
pub struct StreamState {
    pub stream_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    /// Cheap, lock-free signal the Runner polls at each chunk boundary so
    /// cancellation does not require acquiring `inner`.
    cancelled: AtomicBool,
    /// Mirrors of `inner`'s status/end_time/content length, updated under
    /// the same critical section that mutates them, so the Registry's
    /// coarse, synchronous mutex never has to await the per-stream lock.
    status_hint: AtomicU8,
    end_time_hint_millis: AtomicI64,
    content_len_hint: AtomicUsize,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for StreamState {
    /// Hand-rolled rather than derived: `Inner` holds `Connection`, which
    /// wraps a `SplitSink` that has no `Debug` impl. Reports the lock-free
    /// hints only, which is all a synchronous `Debug` call can read anyway.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("stream_id", &self.stream_id)
            .field("chat_id", &self.chat_id)
            .field("user_id", &self.user_id)
            .field("status", &self.status_hint())
            .finish()
    }
}

impl StreamState {
    pub fn new(stream_id: String, chat_id: String, user_id: String) -> Arc<Self> {
        Arc::new(Self {
            stream_id,
            chat_id,
            user_id,
            start_time: Utc::now(),
            cancelled: AtomicBool::new(false),
            status_hint: AtomicU8::new(StreamStatus::Running.to_tag()),
            end_time_hint_millis: AtomicI64::new(0),
            content_len_hint: AtomicUsize::new(0),
            inner: Mutex::new(Inner {
                accumulated_content: String::new(),
                meta_info: Vec::new(),
                subscribers: HashMap::new(),
                status: StreamStatus::Running,
                error_text: None,
                end_time: None,
                runner_handle: None,
            }),
        })
    }

    pub async fn set_runner_handle(&self, handle: JoinHandle<()>) {
        self.inner.lock().await.runner_handle = Some(handle);
    }

    /// Cheap flag check for the Runner's cooperative cancellation point.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Synchronous, lock-free status read for the Registry's coarse mutex
    /// critical sections. May be a stride stale relative to a concurrent
    /// `mark_*`; callers treat it as advisory, matching the Registry's own
    /// BusyChat race tolerance.
    pub fn status_hint(&self) -> StreamStatus {
        StreamStatus::from_tag(self.status_hint.load(Ordering::Acquire))
    }

    pub fn end_time_hint(&self) -> Option<DateTime<Utc>> {
        let millis = self.end_time_hint_millis.load(Ordering::Acquire);
        if millis == 0 {
            None
        } else {
            Utc.timestamp_millis_opt(millis).single()
        }
    }

    pub fn content_length_hint(&self) -> usize {
        self.content_len_hint.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> StreamStatus {
        self.inner.lock().await.status
    }

    pub async fn accumulated_content(&self) -> String {
        self.inner.lock().await.accumulated_content.clone()
    }

    /// Append a content delta, fanning it out to current subscribers.
    /// No-op if the stream is not Running or `text` is empty.
    pub async fn append_chunk(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.status != StreamStatus::Running {
            return;
        }
        inner.accumulated_content.push_str(text);
        self.content_len_hint
            .store(inner.accumulated_content.len(), Ordering::Release);
        let frame = OutboundFrame::MessageChunk {
            content: text.to_string(),
            stream_id: self.stream_id.clone(),
            chat_id: self.chat_id.clone(),
        };
        Self::fan_out(&mut inner, &frame).await;
    }

    /// Append a meta-info line, fanning it out to current subscribers.
    pub async fn append_meta(&self, info: &str) {
        if info.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.status != StreamStatus::Running {
            return;
        }
        inner.meta_info.push(info.to_string());
        let frame = OutboundFrame::MetaInfoUpdate {
            content: info.to_string(),
            stream_id: self.stream_id.clone(),
            chat_id: self.chat_id.clone(),
        };
        Self::fan_out(&mut inner, &frame).await;
    }

    fn set_terminal_hints(&self, status: StreamStatus, end: DateTime<Utc>) {
        self.status_hint.store(status.to_tag(), Ordering::Release);
        self.end_time_hint_millis
            .store(end.timestamp_millis(), Ordering::Release);
    }

    pub async fn mark_complete(&self) {
        let mut inner = self.inner.lock().await;
        if inner.status != StreamStatus::Running {
            return;
        }
        let end = Utc::now();
        inner.status = StreamStatus::Completed;
        inner.end_time = Some(end);
        self.set_terminal_hints(StreamStatus::Completed, end);
        let frame = OutboundFrame::MessageComplete {
            stream_id: self.stream_id.clone(),
            chat_id: self.chat_id.clone(),
        };
        Self::fan_out(&mut inner, &frame).await;
    }

    pub async fn mark_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if inner.status != StreamStatus::Running {
            return;
        }
        let message = message.into();
        let end = Utc::now();
        inner.status = StreamStatus::Errored;
        inner.error_text = Some(message.clone());
        inner.end_time = Some(end);
        self.set_terminal_hints(StreamStatus::Errored, end);
        let frame = OutboundFrame::Error {
            message,
            stream_id: Some(self.stream_id.clone()),
            chat_id: Some(self.chat_id.clone()),
        };
        Self::fan_out(&mut inner, &frame).await;
    }

    /// Cancellation is a user outcome, not a failure: subscribers see
    /// `message_complete`, never `error`.
    async fn mark_cancelled(&self) {
        let mut inner = self.inner.lock().await;
        if inner.status != StreamStatus::Running {
            return;
        }
        let end = Utc::now();
        inner.status = StreamStatus::Cancelled;
        inner.end_time = Some(end);
        self.set_terminal_hints(StreamStatus::Cancelled, end);
        let frame = OutboundFrame::MessageComplete {
            stream_id: self.stream_id.clone(),
            chat_id: self.chat_id.clone(),
        };
        Self::fan_out(&mut inner, &frame).await;
    }

    /// Invokes `mark_cancelled` and signals the Runner to stop. Safe to call
    /// repeatedly; idempotent.
    ///
    /// This sets the cooperative `cancelled` flag rather than forcibly
    /// aborting `runner_handle`: the Runner must still reach its own
    /// persist-partial-content step (spec step 6) before it exits, and a
    /// hard `JoinHandle::abort()` could land mid-persist and violate the
    /// exactly-once guarantee on the partial assistant message. The handle
    /// is retained only so a caller could join it if ever needed.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.mark_cancelled().await;
    }

    /// Add a subscriber and atomically replay the full prefix under this
    /// state's lock: `message_start`, the accumulated content (if any),
    /// every meta_info item in order, and the terminal frame if the stream
    /// already finished. Discards the subscription silently on any send
    /// failure during replay.
    ///
    /// Returns whether a terminal frame was part of the replay, i.e. the
    /// stream was already finished at the moment of subscription. Callers
    /// (the Dispatcher's `subscribe` handling) use this instead of
    /// re-checking `status()` afterwards, since the status could otherwise
    /// change between the check and this call.
    pub async fn subscribe(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.inner.lock().await;
        inner.subscribers.insert(connection.id, connection.clone());

        let start = OutboundFrame::MessageStart {
            role: "assistant",
            stream_id: self.stream_id.clone(),
            chat_id: self.chat_id.clone(),
        };
        if connection.send(&start).await.is_err() {
            inner.subscribers.remove(&connection.id);
            return false;
        }

        if !inner.accumulated_content.is_empty() {
            let chunk = OutboundFrame::MessageChunk {
                content: inner.accumulated_content.clone(),
                stream_id: self.stream_id.clone(),
                chat_id: self.chat_id.clone(),
            };
            if connection.send(&chunk).await.is_err() {
                inner.subscribers.remove(&connection.id);
                return false;
            }
        }

        for info in inner.meta_info.clone() {
            let frame = OutboundFrame::MetaInfoUpdate {
                content: info,
                stream_id: self.stream_id.clone(),
                chat_id: self.chat_id.clone(),
            };
            if connection.send(&frame).await.is_err() {
                inner.subscribers.remove(&connection.id);
                return false;
            }
        }

        if inner.status.is_terminal() {
            let terminal = match inner.status {
                StreamStatus::Errored => OutboundFrame::Error {
                    message: inner
                        .error_text
                        .clone()
                        .unwrap_or_else(|| "stream errored".to_string()),
                    stream_id: Some(self.stream_id.clone()),
                    chat_id: Some(self.chat_id.clone()),
                },
                _ => OutboundFrame::MessageComplete {
                    stream_id: self.stream_id.clone(),
                    chat_id: self.chat_id.clone(),
                },
            };
            if connection.send(&terminal).await.is_err() {
                inner.subscribers.remove(&connection.id);
            }
            return true;
        }
        false
    }

    pub async fn unsubscribe(&self, connection_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.remove(&connection_id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    async fn fan_out(inner: &mut Inner, frame: &OutboundFrame) {
        let mut dead = Vec::new();
        for (id, conn) in inner.subscribers.iter() {
            if conn.send(frame).await.is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            inner.subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_before_running_is_noop_after_terminal() {
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        state.mark_complete().await;
        state.append_chunk("late").await;
        assert_eq!(state.accumulated_content().await, "");
        assert_eq!(state.status().await, StreamStatus::Completed);
    }

    #[tokio::test]
    async fn mark_complete_is_terminal_once() {
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        state.append_chunk("he").await;
        state.mark_complete().await;
        state.mark_error("too late").await;
        assert_eq!(state.status().await, StreamStatus::Completed);
        assert_eq!(state.accumulated_content().await, "he");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let state = StreamState::new("s1".into(), "c1".into(), "u1".into());
        state.append_chunk("he").await;
        state.cancel().await;
        state.cancel().await;
        assert_eq!(state.status().await, StreamStatus::Cancelled);
        assert!(state.is_cancelled());
    }
}
