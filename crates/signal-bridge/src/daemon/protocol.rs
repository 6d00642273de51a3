//! Tool-call envelope: one JSON object per line in each direction.
//!
//! A call is `{id, v, method, params}`; the reply is
//! `{id, ok, result, error: {code, message}, meta: {server_ms, protocol_v}}`.
//! Bridge failures travel inside `result`; `error` is only for calls the
//! server refused outright (see `CallError`).
//!
//! CHANGELOG:
//! - 10/19/2026 - Typed call rejections replace free-form error codes
//! - 10/19/2026 - Envelope carried over stdio instead of a UNIX socket
//! - 10/19/2026 - Initial implementation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

/// Current envelope version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Why a call never reached (or was refused by) the operation table.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Failed to parse request: {0}")]
    InvalidRequest(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Missing or mistyped parameters.
    #[error("{0}")]
    InvalidParams(String),
}

impl CallError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CallError::InvalidRequest(_) => "INVALID_REQUEST",
            CallError::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            CallError::UnknownMethod(_) => "UNKNOWN_METHOD",
            CallError::InvalidParams(_) => "INVALID_PARAMS",
        }
    }
}

/// Tool call from the host.
#[derive(Debug, Deserialize)]
pub struct Request {
    /// Echoed in the response
    pub id: String,
    /// Envelope version; assumed current when absent
    #[serde(default = "current_version")]
    pub v: u8,
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

fn current_version() -> u8 {
    PROTOCOL_VERSION
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, CallError> {
        serde_json::from_str(line).map_err(|e| CallError::InvalidRequest(e.to_string()))
    }

    /// Reject envelopes from a newer (or older) host.
    pub fn check_version(&self) -> Result<(), CallError> {
        if self.v == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(CallError::UnsupportedVersion(self.v))
        }
    }
}

/// Reply to one call.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    /// Time spent on the call, in milliseconds
    pub server_ms: f64,
    pub protocol_v: u8,
}

impl Response {
    /// Wrap a call outcome, timing it from `started`.
    pub fn new(id: String, outcome: Result<Value, CallError>, started: Instant) -> Self {
        let meta = ResponseMeta {
            server_ms: started.elapsed().as_secs_f64() * 1000.0,
            protocol_v: PROTOCOL_VERSION,
        };
        match outcome {
            Ok(result) => Self {
                id,
                ok: true,
                result: Some(result),
                error: None,
                meta,
            },
            Err(e) => Self {
                id,
                ok: false,
                result: None,
                error: Some(ErrorInfo {
                    code: e.error_code(),
                    message: e.to_string(),
                }),
                meta,
            },
        }
    }

    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req = Request::parse(r#"{"id":"r1","method":"health"}"#).unwrap();
        assert_eq!(req.v, 1);
        assert!(req.params.is_empty());
        assert!(req.check_version().is_ok());
    }

    #[test]
    fn test_malformed_request_is_invalid_request() {
        let err = Request::parse(r#"{"id":"r1"}"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");

        let future = Request::parse(r#"{"id":"r1","v":2,"method":"health"}"#).unwrap();
        let err = future.check_version().unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_VERSION");
        assert_eq!(err.to_string(), "unsupported protocol version 2");
    }

    #[test]
    fn test_response_lines() {
        let started = Instant::now();
        let line = Response::new("r1".into(), Ok(json!({"x": 1})), started)
            .to_line()
            .unwrap();
        let ok: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["result"]["x"], 1);
        assert_eq!(ok["meta"]["protocol_v"], 1);
        assert!(ok["error"].is_null());

        let refused = Response::new(
            "r2".into(),
            Err(CallError::UnknownMethod("run_shell".into())),
            started,
        );
        let line = refused.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let refused: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(refused["ok"], false);
        assert_eq!(refused["error"]["code"], "UNKNOWN_METHOD");
        assert_eq!(refused["error"]["message"], "Unknown method: run_shell");
    }
}
