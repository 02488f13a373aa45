//! Wire shapes for the JSON-RPC 2.0 surface.
//!
//! Only the envelope lives here; method params and results are typed in
//! `rpc::methods`. A response carries exactly one of `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// Reserved by JSON-RPC.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Engine failures, mapped from `EngineError` in `rpc::error`.
pub const NOT_FOUND: i64 = -32001;
pub const BAD_REQUEST: i64 = -32002;
pub const CONFLICT: i64 = -32003;

/// Inbound call. An absent `id` marks a notification; the router still
/// answers it so stdio clients can pair lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn has_supported_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Params, with an absent value read as an empty object so every
    /// method can deserialize into a struct of optional fields.
    pub fn params_or_empty(&mut self) -> Value {
        self.params
            .take()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn envelope(id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: None,
        }
    }

    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::envelope(id)
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            ..Self::envelope(id)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_without_params_reads_as_empty_object() {
        let mut req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"sessions.list"}"#).unwrap();
        assert!(req.has_supported_version());
        assert!(req.id.is_none());
        assert_eq!(req.params_or_empty(), json!({}));
    }

    #[test]
    fn test_success_omits_error_field() {
        let resp = JsonRpcResponse::success(Some(json!(7)), json!({"ok": true}));
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire, json!({"jsonrpc": "2.0", "id": 7, "result": {"ok": true}}));
        assert!(!resp.is_error());
    }

    #[test]
    fn test_error_keeps_null_id() {
        let resp = JsonRpcResponse::error(None, NOT_FOUND, "Session s-1 not found");
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["id"], Value::Null);
        assert_eq!(wire["error"]["code"], -32001);
        assert!(wire.get("result").is_none());
        assert!(wire["error"].get("data").is_none());
    }
}
