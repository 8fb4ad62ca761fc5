//! Wire messages
//!
//! Newline-delimited JSON-RPC 2.0 frames plus the `type`-tagged stream
//! records some agents print alongside them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request identifier; the conductor always chooses numbers, agents may use strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC method not found
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC notification (no id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// A `type`-tagged record printed by stream-style agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(alias = "assistant")]
    Text {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        message: Option<Value>,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<Value>,
    },
}

impl StreamRecord {
    /// Text carried by an assistant/text record
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Text { text: Some(t), .. } => Some(t.clone()),
            Self::Text {
                message: Some(message),
                ..
            } => {
                // {"content":[{"type":"text","text":"..."}]}
                let parts: Vec<&str> = message
                    .get("content")?
                    .as_array()?
                    .iter()
                    .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|c| c.get("text").and_then(Value::as_str))
                    .collect();
                (!parts.is_empty()).then(|| parts.join(""))
            }
            _ => None,
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone)]
pub enum ProtocolMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    Record(StreamRecord),
}

impl ProtocolMessage {
    /// Classify one line of agent output.
    ///
    /// Returns `Err` with a short reason for lines that are not a known frame.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> std::result::Result<Self, String> {
        let obj = value.as_object().ok_or("frame is not a JSON object")?;
        let has_id = obj.get("id").map(|v| !v.is_null()).unwrap_or(false);
        let has_method = obj.contains_key("method");
        let is_response = obj.contains_key("result") || obj.contains_key("error");
        let has_type = obj.contains_key("type");

        let decode = |e: serde_json::Error| e.to_string();
        if has_method && has_id {
            serde_json::from_value(value).map(Self::Request).map_err(decode)
        } else if has_method {
            serde_json::from_value(value).map(Self::Notification).map_err(decode)
        } else if has_id && is_response {
            serde_json::from_value(value).map(Self::Response).map_err(decode)
        } else if has_type {
            serde_json::from_value(value).map(Self::Record).map_err(decode)
        } else {
            Err("unrecognised frame".to_string())
        }
    }
}
