//! Result shapes returned to the agent, and CLI output control.
//!
//! CHANGELOG:
//! - 10/19/2026 - Message/send result shapes for the operation table
//! - 10/19/2026 - Initial implementation

use serde::Serialize;
use serde_json::{json, Value};

use crate::inbox::InboundMessage;
use crate::messaging::DeliveryReceipt;

/// Structured result for received messages. Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// RFC 3339 rendering of `timestamp`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    /// Nothing arrived.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

impl From<&InboundMessage> for MessageResponse {
    fn from(record: &InboundMessage) -> Self {
        Self {
            message: Some(record.body.clone()),
            sender_id: Some(record.sender.sender_id().to_string()),
            group_name: record.group_name.clone(),
            group_id: record.group_id.clone(),
            timestamp: record.timestamp,
            received_at: record.timestamp.and_then(format_timestamp),
            error: None,
        }
    }
}

/// Milliseconds since the epoch -> RFC 3339.
pub fn format_timestamp(millis: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.to_rfc3339())
}

/// Successful send, as returned to the agent.
pub fn send_result(receipt: &DeliveryReceipt) -> Value {
    json!({
        "message": "Message sent successfully",
        "timestamp": receipt.timestamp,
        "recipients": receipt.recipients,
    })
}

/// Error object returned in place of a result.
pub fn error_result(error: impl std::fmt::Display) -> Value {
    json!({ "error": error.to_string() })
}

/// Format error as JSON.
pub fn format_error(error: &str) -> String {
    serde_json::to_string(&json!({
        "error": error,
        "success": false
    }))
    .unwrap_or_else(|_| format!(r#"{{"error":"{}"}}"#, error))
}

/// Output control settings from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct OutputControls {
    pub compact: bool,
    pub max_text_chars: Option<usize>,
}

impl OutputControls {
    /// Render data according to output controls.
    pub fn emit<T: Serialize>(&self, data: &T) -> String {
        let value = serde_json::to_value(data).unwrap_or(Value::Null);
        let value = match self.max_text_chars {
            Some(max_chars) => truncate_text_fields(&value, max_chars),
            None => value,
        };

        if self.compact {
            serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string())
        } else {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
        }
    }

    /// Print data to stdout according to output controls.
    pub fn print<T: Serialize>(&self, data: &T) {
        println!("{}", self.emit(data));
    }
}

/// Truncate string fields in a JSON value (char-aware).
fn truncate_text_fields(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            let cut: String = s.chars().take(max_chars).collect();
            Value::String(format!("{}...", cut))
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(|v| truncate_text_fields(v, max_chars)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_text_fields(v, max_chars)))
                .collect(),
        ),
        _ => value.clone(),
    }
}
