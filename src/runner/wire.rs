//! Newline-delimited wire format decoding for the Agent Transport response
//! body (spec.md §4.3).
//!
//! Grounded on the byte-oriented, chunk-boundary-safe line buffering the
//! spec calls for directly (§4.3 step 3, §9 "Newline-delimited JSON over
//! HTTP"): bytes accumulate in a `BytesMut`, are split only on `\n`, and are
//! decoded as UTF-8 only once a full line is assembled — mirroring the SSE
//! line-buffering idiom visible in the retrieval pack's chat-completions
//! streaming clients, reimplemented here without an external SSE crate
//! since the wire format is a restricted subset the spec fully pins down.

use bytes::{Buf, BytesMut};

use crate::error::GatewayError;

/// One decoded line of the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum WireLine {
    /// Blank line or an SSE comment (`:`-prefixed); carries no information.
    Ignore,
    /// An `info: <text>` meta-info line.
    Meta(String),
    /// A `data: <json>` or `data: [DONE]` line. `content` is the delta (if
    /// any); `finish` is set on `finish_reason == "stop"` or on `[DONE]`.
    Data { content: Option<String>, finish: bool },
    /// A `data: {"error": {...}}` terminal error line.
    Error(String),
}

/// Decode one already newline-stripped line of the wire format.
pub fn decode_line(line: &str) -> Result<WireLine, GatewayError> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(WireLine::Ignore);
    }
    if let Some(tail) = line.strip_prefix("info:") {
        return Ok(WireLine::Meta(tail.trim_start().to_string()));
    }
    if let Some(tail) = line.strip_prefix("data:") {
        let tail = tail.trim();
        if tail == "[DONE]" {
            return Ok(WireLine::Data {
                content: None,
                finish: true,
            });
        }
        let value: serde_json::Value = serde_json::from_str(tail)
            .map_err(|e| GatewayError::DecodeError(format!("{e}: {tail}")))?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("agent returned an unspecified error")
                .to_string();
            return Ok(WireLine::Error(message));
        }

        let choice = value.get("choices").and_then(|c| c.get(0));
        let content = choice
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string);
        let finish = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|f| f.as_str())
            .map(|f| f == "stop")
            .unwrap_or(false);
        return Ok(WireLine::Data { content, finish });
    }
    Ok(WireLine::Ignore)
}

/// Accumulates bytes across chunk boundaries and yields complete lines.
///
/// Buffer accounting is byte-oriented: a line is only decoded as UTF-8 once
/// its terminating `\n` has been seen, so a multi-byte UTF-8 sequence split
/// across two chunks is never misdecoded.
#[derive(Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every complete line assembled so
    /// far (in order). Trailing `\r` (CRLF framing) is stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_blank_and_comment_lines() {
        assert_eq!(decode_line("").unwrap(), WireLine::Ignore);
        assert_eq!(decode_line(": keepalive").unwrap(), WireLine::Ignore);
    }

    #[test]
    fn decodes_info_line() {
        assert_eq!(
            decode_line("info: container-7a2f").unwrap(),
            WireLine::Meta("container-7a2f".to_string())
        );
    }

    #[test]
    fn decodes_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"he"}}]}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            WireLine::Data {
                content: Some("he".to_string()),
                finish: false
            }
        );
    }

    #[test]
    fn finish_reason_stop_sets_finish() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            WireLine::Data {
                content: None,
                finish: true
            }
        );
    }

    #[test]
    fn done_sentinel_is_equivalent_to_finish() {
        assert_eq!(
            decode_line("data: [DONE]").unwrap(),
            WireLine::Data {
                content: None,
                finish: true
            }
        );
    }

    #[test]
    fn error_object_yields_error_line() {
        let line = r#"data: {"error": {"message": "rate limited"}}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            WireLine::Error("rate limited".to_string())
        );
    }

    #[test]
    fn malformed_json_is_decode_error() {
        assert!(decode_line("data: {not json}").is_err());
    }

    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"choices\":[{\"delta\"").is_empty());
        let lines = buf.push(b":{\"content\":\"hi\"}}]}\ndata: [DONE]\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(
            decode_line(&lines[0]).unwrap(),
            WireLine::Data {
                content: Some("hi".to_string()),
                finish: false
            }
        );
    }

    #[test]
    fn line_buffer_strips_trailing_cr() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"info: hello\r\n");
        assert_eq!(lines, vec!["info: hello".to_string()]);
    }
}
