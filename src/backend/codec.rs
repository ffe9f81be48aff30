//! Line framing for the stdio JSON-RPC transport.
//!
//! Outbound messages are serialized as one JSON object per line with a
//! trailing newline. Inbound bytes arrive in arbitrary chunks; the
//! decoder accumulates them, first attempting to parse the whole buffer
//! as a single object (some backends emit an object with no trailing
//! newline in one write), then falling back to newline splitting.
//! Malformed lines are logged and skipped; they never abort the
//! stream.

use serde_json::Value;

use crate::jsonrpc::JsonRpcId;

/// Maximum bytes buffered while waiting for a newline (10 MB).
///
/// An unterminated buffer beyond this limit is dropped so a misbehaving
/// backend cannot grow the decoder without bound.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Serialize a JSON-RPC request as a framed line.
pub fn request_line(id: &JsonRpcId, method: &str, params: &Value) -> String {
    let mut line = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string();
    line.push('\n');
    line
}

/// Serialize a JSON-RPC notification (no id) as a framed line.
pub fn notification_line(method: &str, params: &Value) -> String {
    let mut line = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
    .to_string();
    line.push('\n');
    line
}

/// Incremental decoder for line-framed JSON objects.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered awaiting a frame boundary.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk of bytes, returning every complete JSON object it
    /// yields in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);

        // Fast path: the buffer as a whole is one object, newline or not.
        if let Ok(value) = serde_json::from_slice::<Value>(&self.buf) {
            if value.is_object() {
                self.buf.clear();
                return vec![value];
            }
        }

        let mut out = Vec::new();

        // Consume every complete line; keep the unterminated remainder.
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let trimmed = trim_ascii(&line);
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Value>(trimmed) {
                Ok(value) if value.is_object() => out.push(value),
                Ok(_) => {
                    tracing::warn!(len = trimmed.len(), "skipping non-object frame");
                }
                Err(e) => {
                    tracing::warn!(error = %e, len = trimmed.len(), "skipping malformed frame");
                }
            }
        }

        if self.buf.len() > MAX_MESSAGE_BYTES {
            tracing::warn!(
                len = self.buf.len(),
                "dropping oversized unterminated frame buffer"
            );
            self.buf.clear();
        }

        out
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_shape() {
        let line = request_line(
            &JsonRpcId::Number(1),
            "initialize",
            &serde_json::json!({"capabilities": {}}),
        );
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["method"], "initialize");
    }

    #[test]
    fn test_notification_line_has_no_id() {
        let line = notification_line("notifications/initialized", &serde_json::json!({}));
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert!(parsed.get("id").is_none());
        assert_eq!(parsed["method"], "notifications/initialized");
    }

    #[test]
    fn test_decode_single_line() {
        let mut dec = LineDecoder::new();
        let out = dec.feed(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], 1);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_decode_object_without_trailing_newline() {
        let mut dec = LineDecoder::new();
        let out = dec.feed(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], 7);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_decode_multiple_lines_in_one_chunk() {
        let mut dec = LineDecoder::new();
        let out = dec.feed(
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":1}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":2}\n",
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[1]["id"], 2);
    }

    #[test]
    fn test_decode_split_across_chunks() {
        let mut dec = LineDecoder::new();
        // A partial prefix is not a complete object and not a complete line.
        assert!(dec.feed(b"{\"jsonrpc\":\"2.0\",\"id\":3,").is_empty());
        let out = dec.feed(b"\"result\":{\"ok\":true}}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], 3);
    }

    #[test]
    fn test_decode_skips_empty_lines() {
        let mut dec = LineDecoder::new();
        let out = dec.feed(b"\n\n{\"jsonrpc\":\"2.0\",\"id\":4,\"result\":null}\n\n");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_decode_skips_malformed_line_and_continues() {
        let mut dec = LineDecoder::new();
        let out = dec.feed(b"not json at all\n{\"jsonrpc\":\"2.0\",\"id\":5,\"result\":0}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], 5);
    }

    #[test]
    fn test_decode_skips_non_object_frame() {
        let mut dec = LineDecoder::new();
        let out = dec.feed(b"[1,2,3]\n{\"jsonrpc\":\"2.0\",\"id\":6,\"result\":0}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], 6);
    }

    #[test]
    fn test_oversized_unterminated_buffer_is_dropped() {
        let mut dec = LineDecoder::new();
        let big = vec![b'x'; MAX_MESSAGE_BYTES + 1];
        assert!(dec.feed(&big).is_empty());
        assert_eq!(dec.buffered(), 0);
        // The decoder recovers for subsequent frames.
        let out = dec.feed(b"{\"jsonrpc\":\"2.0\",\"id\":8,\"result\":0}\n");
        assert_eq!(out.len(), 1);
    }
}
