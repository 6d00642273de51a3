//! Classification of caller-supplied participant references.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use serde_json::{json, Value};

use super::IdentityCache;

/// What a caller handed us as "the other party".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantRef {
    /// Daemon-assigned opaque id (a UUID).
    OpaqueId(String),
    /// E.164 phone number.
    Phone(String),
    /// Human-chosen handle (username).
    Name(String),
}

impl ParticipantRef {
    /// Classify a raw reference.
    ///
    /// Anything starting with `+` (or a bare run of 10+ digits) is a phone
    /// number, a parseable UUID is an opaque id, the rest are handles.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if let Some(phone) = normalize_phone(trimmed) {
            return ParticipantRef::Phone(phone);
        }
        if let Ok(uuid) = uuid::Uuid::parse_str(trimmed) {
            return ParticipantRef::OpaqueId(uuid.hyphenated().to_string());
        }
        ParticipantRef::Name(trimmed.to_string())
    }

    /// Replace a handle with its cached opaque id, when we have one.
    pub fn normalize(self, cache: &IdentityCache) -> Self {
        match self {
            ParticipantRef::Name(name) => match cache.resolve_name(&name) {
                Some(id) => ParticipantRef::OpaqueId(id),
                None => ParticipantRef::Name(name),
            },
            other => other,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ParticipantRef::OpaqueId(s) | ParticipantRef::Phone(s) | ParticipantRef::Name(s) => s,
        }
    }

    /// Addressing fragment for a `send` request.
    ///
    /// Handles go out as `username`; ids and numbers as `recipient`.
    pub fn send_target(&self) -> (&'static str, Value) {
        match self {
            ParticipantRef::Name(name) => ("username", json!([name])),
            ParticipantRef::OpaqueId(s) | ParticipantRef::Phone(s) => ("recipient", json!([s])),
        }
    }
}

/// Normalize a phone number to `+digits`, or None if it is not one.
fn normalize_phone(input: &str) -> Option<String> {
    let explicit = input.starts_with('+');
    let body = if explicit { &input[1..] } else { input };
    if body.is_empty()
        || !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.'))
    {
        return None;
    }

    let digits: String = body.chars().filter(|c| c.is_ascii_digit()).collect();
    let long_enough = if explicit {
        digits.len() >= 7
    } else {
        digits.len() >= 10
    };
    if !long_enough {
        return None;
    }
    Some(format!("+{}", digits))
}
