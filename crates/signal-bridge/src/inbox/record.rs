//! Normalized inbound message records.
//!
//! The daemon pushes `receive` notifications whose params either wrap the
//! payload in an `envelope` object or carry the fields flat:
//!
//! ```json
//! {"envelope": {"sourceNumber": "+1555...", "sourceUuid": "...", "sourceName": "alice.01",
//!               "timestamp": 1700000000000,
//!               "dataMessage": {"message": "hi", "groupInfo": {"groupId": "...", "name": "Team"}}}}
//! {"source": "+1555...", "sourceUuid": "...", "message": "hi"}
//! ```
//!
//! CHANGELOG:
//! - 10/19/2026 - Accept flat params alongside the envelope shape
//! - 10/19/2026 - Initial implementation

use serde::Serialize;
use serde_json::Value;

/// Raw notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Carries a text body; the only kind delivered to waiters.
    Message,
    Receipt,
    Typing,
    Other,
}

/// Who sent a record. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderRef {
    pub number: Option<String>,
    pub uuid: Option<String>,
    pub name: Option<String>,
}

impl SenderRef {
    /// Phone number, else opaque id, else "unknown".
    pub fn sender_id(&self) -> &str {
        self.number
            .as_deref()
            .or(self.uuid.as_deref())
            .unwrap_or("unknown")
    }

    /// Handle worth caching against the opaque id: profile name, else number.
    pub fn handle(&self) -> Option<&str> {
        self.name.as_deref().or(self.number.as_deref())
    }

    /// True when `reference` is literally one of our identifiers.
    pub fn is(&self, reference: &str) -> bool {
        [&self.number, &self.uuid, &self.name]
            .into_iter()
            .flatten()
            .any(|field| field == reference || field.eq_ignore_ascii_case(reference))
    }
}

/// One inbound notification, normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    /// Arrival order, assigned by the router.
    pub seq: u64,
    pub sender: SenderRef,
    /// Text body, empty when absent.
    pub body: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    /// Milliseconds since the epoch, as reported by the sender.
    pub timestamp: Option<i64>,
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Parse the params of a `receive` notification.
    ///
    /// Never fails: missing fields fall back to empty values.
    pub fn from_receive_params(params: &Value) -> Self {
        let envelope = params
            .get("envelope")
            .filter(|e| e.is_object())
            .unwrap_or(params);

        let sender = SenderRef {
            number: string_field(envelope, &["sourceNumber", "source"]),
            uuid: string_field(envelope, &["sourceUuid"]),
            name: string_field(envelope, &["sourceName"]),
        };

        let data = envelope.get("dataMessage").filter(|d| d.is_object());
        let body = data
            .and_then(|d| d.get("message"))
            .or_else(|| envelope.get("message"))
            .and_then(Value::as_str)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        let group = data.and_then(|d| d.get("groupInfo")).filter(|g| g.is_object());
        let group_id = group.and_then(|g| string_field(g, &["groupId", "id"]));
        let group_name = group.and_then(|g| string_field(g, &["name", "groupName"]));

        let timestamp = envelope
            .get("timestamp")
            .and_then(Value::as_i64)
            .or_else(|| data.and_then(|d| d.get("timestamp")).and_then(Value::as_i64));

        let kind = if body.is_some() {
            MessageKind::Message
        } else if envelope.get("receiptMessage").is_some() {
            MessageKind::Receipt
        } else if envelope.get("typingMessage").is_some() {
            MessageKind::Typing
        } else {
            MessageKind::Other
        };

        Self {
            seq: 0,
            sender,
            body: body.unwrap_or_default(),
            group_id,
            group_name,
            timestamp,
            kind,
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == MessageKind::Message
    }

    /// (opaque id, handle) pairing revealed by this record, if any.
    pub fn identity_pair(&self) -> Option<(&str, &str)> {
        let uuid = self.sender.uuid.as_deref()?;
        let handle = self.sender.handle()?;
        Some((uuid, handle))
    }
}

fn string_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope_message() {
        let params = json!({
            "envelope": {
                "source": "+15551234567",
                "sourceNumber": "+15551234567",
                "sourceUuid": "abc-123",
                "sourceName": "alice.01",
                "timestamp": 1700000000000i64,
                "dataMessage": {
                    "message": "hello",
                    "groupInfo": {"groupId": "Z3JvdXA=", "name": "Team"}
                }
            }
        });
        let record = InboundMessage::from_receive_params(&params);
        assert_eq!(record.kind, MessageKind::Message);
        assert_eq!(record.body, "hello");
        assert_eq!(record.sender.sender_id(), "+15551234567");
        assert_eq!(record.group_name.as_deref(), Some("Team"));
        assert_eq!(record.group_id.as_deref(), Some("Z3JvdXA="));
        assert_eq!(record.timestamp, Some(1700000000000));
        assert_eq!(record.identity_pair(), Some(("abc-123", "alice.01")));
    }

    #[test]
    fn test_parse_flat_params() {
        let params = json!({"source": "+15551234567", "sourceUuid": "abc-123", "message": "hi"});
        let record = InboundMessage::from_receive_params(&params);
        assert!(record.is_message());
        assert_eq!(record.body, "hi");
        assert_eq!(record.identity_pair(), Some(("abc-123", "+15551234567")));
    }

    #[test]
    fn test_receipt_and_typing_kinds() {
        let receipt = json!({"envelope": {"sourceUuid": "abc-123", "receiptMessage": {"isDelivery": true}}});
        assert_eq!(
            InboundMessage::from_receive_params(&receipt).kind,
            MessageKind::Receipt
        );

        let typing = json!({"envelope": {"sourceUuid": "abc-123", "typingMessage": {"action": "STARTED"}}});
        assert_eq!(
            InboundMessage::from_receive_params(&typing).kind,
            MessageKind::Typing
        );
    }

    #[test]
    fn test_empty_body_is_not_a_message() {
        let params = json!({"envelope": {"sourceNumber": "+15551234567", "dataMessage": {"message": ""}}});
        let record = InboundMessage::from_receive_params(&params);
        assert_eq!(record.kind, MessageKind::Other);
        assert!(!record.is_message());

        let flat = json!({"source": "+15551234567", "message": ""});
        assert_eq!(InboundMessage::from_receive_params(&flat).kind, MessageKind::Other);
    }

    #[test]
    fn test_missing_fields_default() {
        let record = InboundMessage::from_receive_params(&json!({}));
        assert_eq!(record.kind, MessageKind::Other);
        assert_eq!(record.body, "");
        assert_eq!(record.sender.sender_id(), "unknown");
        assert!(record.identity_pair().is_none());
    }

    #[test]
    fn test_sender_is_matches_any_identifier() {
        let sender = SenderRef {
            number: Some("+15551234567".to_string()),
            uuid: Some("abc-123".to_string()),
            name: Some("Alice.01".to_string()),
        };
        assert!(sender.is("+15551234567"));
        assert!(sender.is("abc-123"));
        assert!(sender.is("alice.01"));
        assert!(!sender.is("bob"));
    }
}
