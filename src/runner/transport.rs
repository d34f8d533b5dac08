//! Agent Transport: the HTTP client the Stream Runner drives against the
//! upstream LLM-agent backend (spec.md §4.3, §6).
//!
//! Grounded on the request-assembly shape of the teacher's
//! `executor/llm_executor.rs` (building a message list, issuing one HTTP
//! call, handling the response), generalized to a raw streaming POST rather
//! than a `ChatModel` trait call, since the upstream here is this system's
//! own agent service rather than a pluggable LLM provider.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::store::models::Message;

/// One message in the conversation history sent to the upstream agent.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for HistoryMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.clone(),
            content: message.content.clone(),
        }
    }
}

/// Outbound request body, matching spec.md §6's schema exactly.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub messages: Vec<HistoryMessage>,
    pub stream: bool,
    pub meta_info: String,
    pub user_id: String,
    pub mcp_servers: Vec<String>,
    pub enabled_tools: Value,
    pub model: Option<String>,
}

impl AgentRequest {
    pub fn new(
        messages: Vec<HistoryMessage>,
        meta_info: String,
        user_id: String,
        mcp_servers: Vec<String>,
        enabled_tools: Value,
        model: Option<String>,
    ) -> Self {
        Self {
            messages,
            stream: true,
            meta_info,
            user_id,
            mcp_servers,
            enabled_tools,
            model,
        }
    }
}

/// Thin wrapper around one upstream agent endpoint.
pub struct AgentTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl AgentTransport {
    pub fn new(endpoint: String, total_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(total_timeout)
            .build()
            .expect("reqwest client with only a timeout configured cannot fail to build");
        Self { client, endpoint }
    }

    /// Issue the streaming POST. The caller reads the body with
    /// `Response::bytes_stream` and feeds chunks to a `LineBuffer`.
    pub async fn stream(&self, request: &AgentRequest) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_stream_true() {
        let request = AgentRequest::new(
            vec![HistoryMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            String::new(),
            "u1".to_string(),
            vec![],
            serde_json::json!({}),
            None,
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
