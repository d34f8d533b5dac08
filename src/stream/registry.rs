//! Stream Registry: names, locates, and reaps streams.
//!
//! The map pair (`streams`, `active_by_chat`) is guarded by a single coarse
//! mutex whose critical sections are O(1) — the same shape as the
//! `DashMap`-backed connection pool used elsewhere for membership
//! bookkeeping, generalized here to a second reverse index and a precise
//! `BusyChat` precondition the original source's `StreamManager` does not
//! enforce (it silently overwrites). The janitor cadence mirrors the
//! periodic-cleanup pattern used for reaping stale entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, Result};
use crate::stream::state::{StreamState, StreamStatus};

struct Maps {
    streams: HashMap<String, Arc<StreamState>>,
    active_by_chat: HashMap<String, String>,
}

/// Process-wide map of stream_id -> Stream State, plus the chat_id ->
/// active stream_id reverse index.
pub struct StreamRegistry {
    maps: Mutex<Maps>,
    retention: Duration,
}

/// Lightweight snapshot used by the active-streams-for-user diagnostic.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActiveStreamSummary {
    pub stream_id: String,
    pub chat_id: String,
    pub start_time: chrono::DateTime<Utc>,
    pub content_length: usize,
}

impl StreamRegistry {
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            maps: Mutex::new(Maps {
                streams: HashMap::new(),
                active_by_chat: HashMap::new(),
            }),
            retention,
        })
    }

    /// Insert a fresh Running Stream State. Fails with `BusyChat` if the
    /// chat already has a Running stream; a terminal mapping for the same
    /// chat is silently overwritten.
    pub fn create(&self, stream_id: String, chat_id: String, user_id: String) -> Result<Arc<StreamState>> {
        let mut maps = self.maps.lock();
        if let Some(existing_id) = maps.active_by_chat.get(&chat_id) {
            if let Some(existing) = maps.streams.get(existing_id) {
                // status is read without the state lock here: StreamStatus
                // is Copy and this check only needs to be conservative, the
                // real source of truth is mark_* under the instance lock.
                if matches!(existing.status_hint(), StreamStatus::Running) {
                    return Err(GatewayError::BusyChat(chat_id));
                }
            }
        }
        let state = StreamState::new(stream_id.clone(), chat_id.clone(), user_id);
        maps.streams.insert(stream_id.clone(), state.clone());
        maps.active_by_chat.insert(chat_id, stream_id);
        Ok(state)
    }

    pub fn get(&self, stream_id: &str) -> Option<Arc<StreamState>> {
        self.maps.lock().streams.get(stream_id).cloned()
    }

    /// The current Running Stream State for a chat, or absent if the
    /// mapped stream has already gone terminal.
    pub fn active_for_chat(&self, chat_id: &str) -> Option<Arc<StreamState>> {
        let maps = self.maps.lock();
        let stream_id = maps.active_by_chat.get(chat_id)?;
        let state = maps.streams.get(stream_id)?;
        if matches!(state.status_hint(), StreamStatus::Running) {
            Some(state.clone())
        } else {
            None
        }
    }

    pub async fn cancel(&self, stream_id: &str) {
        let state = self.maps.lock().streams.get(stream_id).cloned();
        if let Some(state) = state {
            state.cancel().await;
        }
    }

    pub fn active_streams_for_user(&self, user_id: &str) -> Vec<ActiveStreamSummary> {
        let maps = self.maps.lock();
        maps.streams
            .values()
            .filter(|s| s.user_id == user_id && matches!(s.status_hint(), StreamStatus::Running))
            .map(|s| ActiveStreamSummary {
                stream_id: s.stream_id.clone(),
                chat_id: s.chat_id.clone(),
                start_time: s.start_time,
                content_length: s.content_length_hint(),
            })
            .collect()
    }

    /// Remove every Stream State that is terminal and older than the
    /// retention window. Never touches Running streams.
    pub fn reap(&self) {
        let mut maps = self.maps.lock();
        let now = Utc::now();
        let expired: Vec<(String, String)> = maps
            .streams
            .values()
            .filter_map(|s| {
                let end_time = s.end_time_hint()?;
                if now.signed_duration_since(end_time).to_std().ok()? >= self.retention {
                    Some((s.stream_id.clone(), s.chat_id.clone()))
                } else {
                    None
                }
            })
            .collect();

        for (stream_id, chat_id) in expired {
            maps.streams.remove(&stream_id);
            if maps.active_by_chat.get(&chat_id) == Some(&stream_id) {
                maps.active_by_chat.remove(&chat_id);
            }
        }
    }

    /// Spawn the janitor loop on the given cadence. Returns its handle so
    /// callers can hold it for the life of the process (aborting it is
    /// never required in normal operation).
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.reap();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_busy_chat() {
        let registry = StreamRegistry::new(Duration::from_secs(3600));
        registry
            .create("s1".into(), "c1".into(), "u1".into())
            .unwrap();
        let err = registry
            .create("s2".into(), "c1".into(), "u1".into())
            .unwrap_err();
        assert!(matches!(err, GatewayError::BusyChat(_)));
    }

    #[tokio::test]
    async fn terminal_chat_slot_is_reusable() {
        let registry = StreamRegistry::new(Duration::from_secs(3600));
        let s1 = registry
            .create("s1".into(), "c1".into(), "u1".into())
            .unwrap();
        s1.mark_complete().await;
        assert!(registry.active_for_chat("c1").is_none());
        registry
            .create("s2".into(), "c1".into(), "u1".into())
            .unwrap();
        assert!(registry.active_for_chat("c1").is_some());
    }

    #[tokio::test]
    async fn active_streams_for_user_lists_only_that_users_running_streams() {
        let registry = StreamRegistry::new(Duration::from_secs(3600));
        let s1 = registry
            .create("s1".into(), "c1".into(), "u1".into())
            .unwrap();
        s1.append_chunk("hi").await;
        registry
            .create("s2".into(), "c2".into(), "other".into())
            .unwrap();
        let s3 = registry
            .create("s3".into(), "c3".into(), "u1".into())
            .unwrap();
        s3.mark_complete().await;

        let summaries = registry.active_streams_for_user("u1");

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].stream_id, "s1");
        assert_eq!(summaries[0].chat_id, "c1");
        assert_eq!(summaries[0].content_length, 2);
    }

    #[tokio::test]
    async fn reap_never_touches_running() {
        let registry = StreamRegistry::new(Duration::from_secs(0));
        registry
            .create("s1".into(), "c1".into(), "u1".into())
            .unwrap();
        registry.reap();
        assert!(registry.get("s1").is_some());
    }
}
