//! Frame types for the signal-cli daemon's JSON-RPC 2.0 protocol.
//!
//! The daemon speaks newline-delimited JSON over TCP. Every line is exactly
//! one JSON object: a request we sent, a response to one of our requests, or
//! an unsolicited notification pushed by the daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Correlated JSON-RPC 2.0 frames replace the uuid envelope
//! - 10/19/2026 - Initial implementation

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version string carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request to the daemon.
///
/// Request format:
/// ```json
/// {"jsonrpc": "2.0", "id": 7, "method": "send", "params": {...}}
/// ```
#[derive(Debug, Serialize)]
pub struct Request {
    /// Always "2.0"
    pub jsonrpc: &'static str,
    /// Correlation id, unique among in-flight requests
    pub id: u64,
    /// Method name (e.g., "send", "listGroups")
    pub method: String,
    /// Method parameters (empty object `{}` if none)
    pub params: Value,
}

impl Request {
    /// Create a new request with the given correlation id.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params: if params.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                params
            },
        }
    }

    /// Serialize to one NDJSON line (compact JSON + newline).
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Error object of a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcErrorObject {
    /// JSON-RPC error code
    #[serde(default)]
    pub code: i64,
    /// Human-readable message from the daemon
    #[serde(default)]
    pub message: String,
    /// Optional additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One line read from the daemon, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A response correlated by numeric id.
    Response {
        id: u64,
        outcome: Result<Value, RpcErrorObject>,
    },
    /// Anything else: pushed notifications, or frames we cannot correlate.
    Notification(Value),
}

impl Incoming {
    /// Parse and classify a single NDJSON line.
    ///
    /// A frame is a response when it has an unsigned integer `id`, carries
    /// `result` or `error`, and has no `method`. Everything else is handed
    /// back verbatim as a notification.
    pub fn from_ndjson_line(line: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Ok(Self::classify(value))
    }

    /// Classify an already-parsed frame.
    pub fn classify(value: Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Incoming::Notification(value);
        };
        if obj.contains_key("method") {
            return Incoming::Notification(value);
        }
        let Some(id) = obj.get("id").and_then(Value::as_u64) else {
            return Incoming::Notification(value);
        };

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            let error = serde_json::from_value::<RpcErrorObject>(error.clone()).unwrap_or_else(|_| {
                RpcErrorObject {
                    code: 0,
                    message: error.to_string(),
                    data: None,
                }
            });
            return Incoming::Response {
                id,
                outcome: Err(error),
            };
        }

        match obj.get("result") {
            Some(result) => Incoming::Response {
                id,
                outcome: Ok(result.clone()),
            },
            None => Incoming::Notification(value),
        }
    }
}

/// Returns true when a raw frame looks like a JSON-RPC response
/// (has an `id` and a `result`/`error`, no `method`).
pub fn looks_like_response(value: &Value) -> bool {
    value.get("method").is_none()
        && value.get("id").is_some()
        && (value.get("result").is_some() || value.get("error").is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line_format() {
        let req = Request::new(3, "send", json!({"message": "hi"}));
        let line = req.to_ndjson_line().unwrap();
        assert!(line.ends_with('\n'));
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 3);
        assert_eq!(parsed["method"], "send");
        assert_eq!(parsed["params"]["message"], "hi");
    }

    #[test]
    fn test_request_null_params_become_object() {
        let req = Request::new(1, "listGroups", Value::Null);
        assert_eq!(req.params, json!({}));
    }

    #[test]
    fn test_classify_success_response() {
        let incoming =
            Incoming::from_ndjson_line(r#"{"jsonrpc":"2.0","id":5,"result":{"timestamp":1}}"#)
                .unwrap();
        assert_eq!(
            incoming,
            Incoming::Response {
                id: 5,
                outcome: Ok(json!({"timestamp": 1}))
            }
        );
    }

    #[test]
    fn test_classify_error_response() {
        let incoming = Incoming::from_ndjson_line(
            r#"{"jsonrpc":"2.0","id":9,"error":{"code":-1,"message":"Unregistered user"}}"#,
        )
        .unwrap();
        match incoming {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, 9);
                let err = outcome.unwrap_err();
                assert_eq!(err.code, -1);
                assert_eq!(err.message, "Unregistered user");
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification() {
        let incoming = Incoming::from_ndjson_line(
            r#"{"jsonrpc":"2.0","method":"receive","params":{"envelope":{}}}"#,
        )
        .unwrap();
        assert!(matches!(incoming, Incoming::Notification(_)));
    }

    #[test]
    fn test_classify_string_id_is_not_correlated() {
        let incoming =
            Incoming::from_ndjson_line(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#).unwrap();
        assert!(matches!(incoming, Incoming::Notification(_)));
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(Incoming::from_ndjson_line("{not json").is_err());
    }

    #[test]
    fn test_looks_like_response() {
        assert!(looks_like_response(&json!({"id": 1, "result": null})));
        assert!(!looks_like_response(&json!({"method": "receive", "params": {}})));
    }
}
