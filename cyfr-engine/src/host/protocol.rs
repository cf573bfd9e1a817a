//! Typed records for the host-function JSON ABI.
//!
//! Every payload crossing the host/guest boundary is a UTF-8 JSON string.
//! These records give the engine typed request/response shapes while
//! keeping the wire format stable; errors always encode as
//! `{"error": {"type": ..., "message": ...}}` and are returned to the
//! guest rather than raised.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};

/// Marker value for base64 body encodings.
pub const ENCODING_BASE64: &str = "base64";

/// `http/fetch.request` and `http/stream.request` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchRequest {
    /// HTTP method; checked against the policy
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request body, plain or base64 per `body_encoding`
    #[serde(default)]
    pub body: Option<String>,
    /// `"base64"` when `body` is base64-encoded
    #[serde(default)]
    pub body_encoding: Option<String>,
    /// Multipart parts; mutually exclusive with `body`
    #[serde(default)]
    pub multipart: Option<Vec<MultipartPart>>,
    /// `"base64"` to receive the response body base64-encoded
    #[serde(default)]
    pub response_encoding: Option<String>,
}

/// One part of a multipart request.
#[derive(Debug, Clone, Deserialize)]
pub struct MultipartPart {
    /// Form field name
    pub name: String,
    /// Part payload, plain or base64 per `encoding`
    pub data: String,
    /// `"base64"` when `data` is base64-encoded
    #[serde(default)]
    pub encoding: Option<String>,
    /// Optional file name
    #[serde(default)]
    pub filename: Option<String>,
    /// Optional content type
    #[serde(default)]
    pub content_type: Option<String>,
}

/// `http/fetch.request` success response.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body, UTF-8 (lossy) or base64 per `body_encoding`
    pub body: String,
    /// `"base64"` when `body` is base64-encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<String>,
}

/// `http/stream.request` success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOpenResponse {
    /// Opaque handle for subsequent `read`/`close` calls
    pub handle: u64,
}

/// `http/stream.read` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamReadRequest {
    /// Handle returned by `request`
    pub handle: u64,
}

/// `http/stream.read` success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamReadResponse {
    /// Buffered data; empty while the producer is idle or finished
    pub data: String,
    /// Whether the producer finished and the buffer drained
    pub done: bool,
}

/// `http/stream.close` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamCloseRequest {
    /// Handle returned by `request`
    pub handle: u64,
}

/// `mcp/tools.call` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct McpCallRequest {
    /// Tool namespace (`component`, `storage`, `policy`, ...)
    pub tool: String,
    /// Action inside the namespace
    pub action: String,
    /// Action arguments
    #[serde(default)]
    pub args: serde_json::Value,
}

impl McpCallRequest {
    /// `namespace.action` identifier matched against `allowed_tools`.
    pub fn action_id(&self) -> String {
        format!("{}.{}", self.tool, self.action)
    }
}

/// `formula/invoke.call` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FormulaCallRequest {
    /// Canonical reference of the component to invoke
    pub reference: String,
    /// Input forwarded to the child execution
    #[serde(default)]
    pub input: serde_json::Value,
    /// Expected component type, validated when present
    #[serde(default, rename = "type")]
    pub component_type: Option<String>,
}

/// Parse a JSON payload arriving from the guest.
pub fn parse_payload<T: DeserializeOwned>(payload: &str) -> EngineResult<T> {
    serde_json::from_str(payload)
        .map_err(|e| EngineError::decode_error(format!("invalid host payload: {e}")))
}

/// Encode a success value for the guest.
///
/// Falls back to an `encode_error` body if serialization fails, so host
/// functions always return valid JSON.
pub fn encode_ok<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => encode_error(&EngineError::encode_error(e.to_string())),
    }
}

/// Encode an error for the guest as `{"error": {"type", "message"}}`.
pub fn encode_error(err: &EngineError) -> String {
    let body = serde_json::json!({
        "error": {
            "type": err.kind(),
            "message": err.to_string(),
        }
    });
    body.to_string()
}

/// Parse a guest output string as JSON, wrapping non-JSON as `{"raw": s}`.
pub fn json_or_raw(output: &str) -> serde_json::Value {
    serde_json::from_str(output)
        .unwrap_or_else(|_| serde_json::json!({ "raw": output }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_fetch_request_minimal() {
        let req: FetchRequest =
            parse_payload(r#"{"method": "GET", "url": "https://api.example.com/x"}"#).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
        assert!(req.multipart.is_none());
    }

    #[test]
    fn test_fetch_request_with_multipart() {
        let req: FetchRequest = parse_payload(
            r#"{
                "method": "POST",
                "url": "https://api.example.com/upload",
                "multipart": [
                    {"name": "file", "data": "aGVsbG8=", "encoding": "base64",
                     "filename": "hello.txt", "content_type": "text/plain"}
                ]
            }"#,
        )
        .unwrap();
        let parts = req.multipart.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename.as_deref(), Some("hello.txt"));
    }

    #[test]
    fn test_parse_payload_rejects_malformed() {
        let err = parse_payload::<FetchRequest>("not json").unwrap_err();
        assert_eq!(err.kind(), "decode_error");
    }

    #[test]
    fn test_error_wire_shape() {
        let json = encode_error(&EngineError::domain_blocked("evil.com"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"]["type"], "domain_blocked");
        assert!(value["error"]["message"].as_str().unwrap().contains("evil.com"));
    }

    #[test]
    fn test_mcp_action_id() {
        let req: McpCallRequest =
            parse_payload(r#"{"tool": "storage", "action": "read", "args": {"path": "agent/x"}}"#)
                .unwrap();
        assert_eq!(req.action_id(), "storage.read");
    }

    #[test]
    fn test_formula_request_type_field() {
        let req: FormulaCallRequest = parse_payload(
            r#"{"reference": "reagent:local.sum:1.0.0", "input": {"a": 1}, "type": "reagent"}"#,
        )
        .unwrap();
        assert_eq!(req.component_type.as_deref(), Some("reagent"));
    }

    #[test]
    fn test_json_or_raw() {
        assert_eq!(json_or_raw(r#"{"result": 8}"#), serde_json::json!({"result": 8}));
        assert_eq!(json_or_raw("plain text"), serde_json::json!({"raw": "plain text"}));
    }

    #[test]
    fn test_stream_read_response_shape() {
        let resp = StreamReadResponse {
            data: String::new(),
            done: true,
        };
        assert_eq!(encode_ok(&resp), r#"{"data":"","done":true}"#);
    }
}
