//! Line-delimited JSON-RPC 2.0 framing (§4.5, §4.8).
//!
//! One JSON object per line, LF-terminated. Shared by the Child MCP
//! Client (as the caller of a child's stdio server) and the host-facing
//! Stdio Server (as the callee of the host's requests) — both speak the
//! same wire shape, just in opposite roles.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::McpError;

/// 16 MiB, per §4.8: a frame larger than this is rejected outright.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// A JSON-RPC 2.0 request or notification (a request has `id`, a
/// notification omits it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request expecting a reply, correlated by `id`.
    pub fn call(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }

    /// Build a fire-and-forget notification (no `id`, no reply expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Whether this frame expects a reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response: exactly one of `result`/`error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Build a successful response to `id`.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response to `id`. `id` is `None` only when the
    /// request itself could not be parsed well enough to recover one.
    pub fn failure(id: Option<Value>, error: JsonRpcErrorObject) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Convert into `Result<Value, McpError>`, the shape callers want.
    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            Err(McpError::Remote {
                code: err.code,
                message: err.message,
            })
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// The `error` member of a JSON-RPC response, carrying the numeric app
/// code from §7 plus an optional structured `data.kind`/`data.fingerprint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    /// Build an error object from a [`nucleus_core::ErrorKind`],
    /// carrying its numeric code and, for `PermissionDenied`, the
    /// fingerprint the host needs to grant.
    pub fn from_kind(kind: &nucleus_core::ErrorKind) -> Self {
        let mut data = serde_json::Map::new();
        data.insert(
            "kind".to_string(),
            Value::String(kind_tag(kind).to_string()),
        );
        if let Some(fp) = kind.fingerprint() {
            data.insert("fingerprint".to_string(), Value::String(fp.to_string()));
        }
        Self {
            code: kind.code(),
            message: kind.to_string(),
            data: Some(Value::Object(data)),
        }
    }
}

fn kind_tag(kind: &nucleus_core::ErrorKind) -> &'static str {
    use nucleus_core::ErrorKind::*;
    match kind {
        ParseError(_) => "parse_error",
        NotInitialized => "not_initialized",
        ToolNotFound(_) => "tool_not_found",
        ToolNotVisible(_) => "tool_not_visible",
        PermissionDenied { .. } => "permission_denied",
        LockContended(_) => "lock_contended",
        Timeout(_) => "timeout",
        ChildClosed(_) => "child_closed",
        HandlerError(_) => "handler_error",
        AuditWriteFailed(_) => "audit_write_failed",
        InvariantViolation(_) => "invariant_violation",
    }
}

/// The literal `"2.0"` JSON-RPC version tag, serialized/deserialized as
/// that exact string but zero-sized in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version: {s}"
            )))
        }
    }
}

/// Read one frame (one LF-terminated line) from an async buffered
/// reader, rejecting frames over [`MAX_FRAME_BYTES`] or containing an
/// embedded NUL. Returns `Ok(None)` on clean EOF.
pub async fn read_frame<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, McpError> {
    let mut buf = Vec::new();
    loop {
        let mut chunk = Vec::new();
        let n = reader
            .read_until(b'\n', &mut chunk)
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        if n == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(McpError::Protocol("unterminated frame at EOF".to_string()))
            };
        }
        buf.extend_from_slice(&chunk);
        if buf.len() > MAX_FRAME_BYTES {
            return Err(McpError::Protocol(format!(
                "frame exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        if chunk.last() == Some(&b'\n') {
            break;
        }
    }
    while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.contains(&0) {
        return Err(McpError::Protocol("frame contains embedded NUL".to_string()));
    }
    let line = String::from_utf8(buf).map_err(|e| McpError::Protocol(e.to_string()))?;
    Ok(Some(line))
}

/// Write one frame, LF-terminated, flushing immediately so replies are
/// never stuck in an internal buffer.
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    value: &impl Serialize,
) -> Result<(), McpError> {
    let mut line = serde_json::to_string(value).map_err(|e| McpError::Protocol(e.to_string()))?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| McpError::Io(e.to_string()))?;
    writer.flush().await.map_err(|e| McpError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_single_line_frame() {
        let data = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"x\"}\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(data));
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(frame.contains("\"method\":\"x\""));
    }

    #[tokio::test]
    async fn reads_multiple_frames_in_order() {
        let data = b"{\"a\":1}\n{\"a\":2}\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(data));
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), "{\"a\":1}");
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), "{\"a\":2}");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_embedded_nul() {
        let mut data = b"{\"a\":\"".to_vec();
        data.push(0);
        data.extend_from_slice(b"\"}\n");
        let mut reader = BufReader::new(Cursor::new(data));
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[tokio::test]
    async fn rejects_oversize_frame() {
        let mut data = vec![b'a'; MAX_FRAME_BYTES + 10];
        data.push(b'\n');
        let mut reader = BufReader::new(Cursor::new(data));
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = JsonRpcRequest::call(7, "tools/call", Some(serde_json::json!({"x": 1})));
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: JsonRpcRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, Some(Value::from(7)));
        assert!(!decoded.is_notification());
    }

    #[test]
    fn notification_has_no_id() {
        let note = JsonRpcRequest::notification("initialized", None);
        assert!(note.is_notification());
        let encoded = serde_json::to_string(&note).unwrap();
        assert!(!encoded.contains("\"id\""));
    }

    #[test]
    fn response_into_result_surfaces_remote_error() {
        let resp = JsonRpcResponse::failure(
            Some(Value::from(1)),
            JsonRpcErrorObject {
                code: 1040,
                message: "boom".to_string(),
                data: None,
            },
        );
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, McpError::Remote { code: 1040, .. }));
    }
}
