//! Tool service - the static operation table over `SignalBridge`.
//!
//! Every bridge failure becomes an `{"error": ...}` result here; only bad
//! parameters and unknown operations surface as `Err`.
//!
//! CHANGELOG:
//! - 10/19/2026 - Parameter validation for wait_for_message bounds
//! - 10/19/2026 - Initial implementation

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::messaging::{SignalBridge, MAX_WAIT};
use crate::output::{error_result, send_result, MessageResponse};

/// Operation names this service answers, aliases included.
pub const METHODS: &[&str] = &[
    "health",
    "send_to_user",
    "send_message_to_user",
    "send_to_group",
    "send_message_to_group",
    "receive_message",
    "wait_for_message",
    "get_message_history",
    "list_chats",
];

const DEFAULT_RECEIVE_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_MAX_WAIT_SECS: i64 = 3600;
const DEFAULT_HISTORY_LIMIT: u64 = 20;

type Params = HashMap<String, Value>;

/// Tool service with a live bridge.
#[derive(Debug, Clone)]
pub struct ToolService {
    bridge: Arc<SignalBridge>,
}

impl ToolService {
    pub fn new(bridge: Arc<SignalBridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<SignalBridge> {
        &self.bridge
    }

    pub fn handles(method: &str) -> bool {
        METHODS.contains(&method)
    }

    /// Dispatch request to appropriate handler.
    pub async fn dispatch(&self, method: &str, params: Params) -> Result<Value> {
        match method {
            "health" => Ok(serde_json::to_value(self.bridge.health())?),
            "send_to_user" | "send_message_to_user" => self.send_to_user(params).await,
            "send_to_group" | "send_message_to_group" => self.send_to_group(params).await,
            "receive_message" => self.receive_message(params).await,
            "wait_for_message" => self.wait_for_message(params).await,
            "get_message_history" => self.get_message_history(params),
            "list_chats" => self.list_chats().await,
            _ => Err(anyhow!("Unknown method: {}", method)),
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Params: message, user_id (alias: recipient)
    async fn send_to_user(&self, params: Params) -> Result<Value> {
        let message = required_str(&params, &["message"])?;
        let user_id = required_str(&params, &["user_id", "recipient"])?;
        info!(user_id, "tool called: send_to_user");

        Ok(match self.bridge.send_to_user(message, user_id).await {
            Ok(receipt) => send_result(&receipt),
            Err(e) => {
                error!(user_id, code = e.error_code(), error = %e, "send_to_user failed");
                error_result(e)
            }
        })
    }

    /// Params: message, group_id (base64 id or group name)
    async fn send_to_group(&self, params: Params) -> Result<Value> {
        let message = required_str(&params, &["message"])?;
        let group_id = required_str(&params, &["group_id", "group"])?;
        info!(group_id, "tool called: send_to_group");

        Ok(match self.bridge.send_to_group(message, group_id).await {
            Ok(receipt) => send_result(&receipt),
            Err(e) => {
                error!(group_id, code = e.error_code(), error = %e, "send_to_group failed");
                error_result(e)
            }
        })
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Params: timeout (seconds, default 30)
    async fn receive_message(&self, params: Params) -> Result<Value> {
        let timeout = match params.get("timeout") {
            None | Some(Value::Null) => DEFAULT_RECEIVE_TIMEOUT_SECS,
            Some(v) => v.as_f64().context("timeout must be a number")?,
        };
        let timeout = Duration::from_secs_f64(timeout.clamp(0.0, MAX_WAIT.as_secs_f64()));

        let response = match self.bridge.receive_next(timeout).await {
            Some(record) => MessageResponse::from(&record),
            None => {
                info!("no message received within timeout");
                MessageResponse::empty()
            }
        };
        Ok(serde_json::to_value(response)?)
    }

    /// Params: from_user (optional), max_wait_seconds (1..=7200, default 3600)
    async fn wait_for_message(&self, params: Params) -> Result<Value> {
        let from_user = optional_str(&params, "from_user")?;
        let max_wait_seconds = match params.get("max_wait_seconds") {
            None | Some(Value::Null) => DEFAULT_MAX_WAIT_SECS,
            Some(v) => v.as_i64().context("max_wait_seconds must be an integer")?,
        };

        if !(1..=MAX_WAIT.as_secs() as i64).contains(&max_wait_seconds) {
            let message = "max_wait_seconds must be between 1 and 7200 (2 hours)";
            error!(max_wait_seconds, "{}", message);
            return Ok(serde_json::to_value(MessageResponse::error(message))?);
        }

        info!(from_user = ?from_user, max_wait_seconds, "tool called: wait_for_message");
        let wait = Duration::from_secs(max_wait_seconds as u64);
        let response = match self.bridge.wait_for_message(from_user, wait).await {
            Some(record) => MessageResponse::from(&record),
            None => {
                let message = format!("No message received within {} seconds", max_wait_seconds);
                info!("{}", message);
                MessageResponse::error(message)
            }
        };
        Ok(serde_json::to_value(response)?)
    }

    /// Params: limit (default 20). Message-kind records only, oldest first.
    fn get_message_history(&self, params: Params) -> Result<Value> {
        let limit = match params.get("limit") {
            None | Some(Value::Null) => DEFAULT_HISTORY_LIMIT,
            Some(v) => v.as_u64().context("limit must be a non-negative integer")?,
        } as usize;

        let records = self.bridge.get_history(usize::MAX);
        let matching: Vec<_> = records.iter().filter(|r| r.is_message()).collect();
        let skip = matching.len().saturating_sub(limit);
        let messages: Vec<MessageResponse> = matching
            .into_iter()
            .skip(skip)
            .map(MessageResponse::from)
            .collect();

        Ok(json!({
            "messages": messages,
            "count": messages.len(),
        }))
    }

    async fn list_chats(&self) -> Result<Value> {
        Ok(match self.bridge.list_chats().await {
            Ok(chats) => serde_json::to_value(chats)?,
            Err(e) => {
                error!(code = e.error_code(), error = %e, "list_chats failed");
                error_result(e)
            }
        })
    }
}

fn required_str<'a>(params: &'a Params, keys: &[&str]) -> Result<&'a str> {
    keys.iter()
        .find_map(|k| params.get(*k).and_then(Value::as_str))
        .with_context(|| format!("missing required string parameter '{}'", keys[0]))
}

fn optional_str<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(anyhow!("{} must be a string, got {}", key, other)),
    }
}
