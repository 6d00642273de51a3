//! Messaging facade - the operations an agent calls.
//!
//! Owns the daemon connection, the notification router and the identity
//! cache. Sends go out through the connection; receives are served from the
//! router's history and waiters without another daemon round trip.
//!
//! CHANGELOG:
//! - 10/19/2026 - Learn identities from send acknowledgments
//! - 10/19/2026 - Group sends accept names, resolved via listGroups
//! - 10/19/2026 - Initial implementation

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use signal_rpc::{ClientError, DaemonConnection};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::identity::{IdentityCache, ParticipantRef};
use crate::inbox::{InboundMessage, NextMessage, NotificationRouter, SenderFilter};

/// Hard ceiling for any blocking wait.
pub const MAX_WAIT: Duration = Duration::from_secs(7200);

/// Per-recipient outcome of a send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Daemon result type, e.g. "SUCCESS" or "UNREGISTERED_FAILURE".
    pub status: String,
}

impl RecipientStatus {
    fn is_unregistered(&self) -> bool {
        matches!(
            self.status.as_str(),
            "UNREGISTERED_FAILURE" | "UNREGISTERED"
        )
    }
}

/// Daemon acknowledgment of a send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReceipt {
    /// Send timestamp (ms) assigned by the daemon.
    pub timestamp: Option<i64>,
    pub recipients: Vec<RecipientStatus>,
}

impl DeliveryReceipt {
    /// Parse a `send` result: `{timestamp, results: [{recipientAddress, type}]}`.
    pub fn from_send_result(result: &Value) -> Self {
        let recipients = result
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .map(|r| {
                        let address = r.get("recipientAddress").unwrap_or(&Value::Null);
                        RecipientStatus {
                            uuid: str_field(address, "uuid"),
                            number: str_field(address, "number"),
                            username: str_field(address, "username"),
                            status: str_field(r, "type").unwrap_or_else(|| "SUCCESS".to_string()),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            timestamp: result.get("timestamp").and_then(Value::as_i64),
            recipients,
        }
    }

    /// True when there were recipients and none of them is registered.
    pub fn all_unregistered(&self) -> bool {
        !self.recipients.is_empty() && self.recipients.iter().all(RecipientStatus::is_unregistered)
    }
}

/// A group the account belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub member_count: usize,
}

/// A direct contact known to the identity cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactSummary {
    pub id: String,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatList {
    pub groups: Vec<GroupSummary>,
    pub contacts: Vec<ContactSummary>,
}

/// Snapshot for the `health` operation.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub pid: u32,
    pub started_at: String,
    pub account: String,
    pub daemon_addr: String,
    pub connected: bool,
    pub cache_entries: usize,
    pub history_len: usize,
    pub active_waiters: usize,
}

/// The bridge: one daemon connection, one router, one identity cache.
#[derive(Debug)]
pub struct SignalBridge {
    account: String,
    connection: DaemonConnection,
    router: NotificationRouter,
    cache: Arc<IdentityCache>,
    router_task: Mutex<Option<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl SignalBridge {
    /// Load the identity cache from the configured path and start.
    pub async fn start(config: BridgeConfig) -> Self {
        let cache = Arc::new(IdentityCache::load(config.cache_path()));
        Self::start_with_cache(config, cache).await
    }

    /// Start with an already-loaded cache.
    ///
    /// Never fails: an unreachable daemon leaves a background reconnect loop
    /// running and sends report connection errors until it comes up.
    pub async fn start_with_cache(config: BridgeConfig, cache: Arc<IdentityCache>) -> Self {
        let (connection, notifications) = DaemonConnection::new(config.connection_config());
        let router = NotificationRouter::new(Arc::clone(&cache), config.history_capacity);
        let router_task = router.spawn(notifications);

        match connection.connect().await {
            Ok(()) => info!(addr = %connection.addr(), account = %config.account, "bridge started"),
            Err(e) => {
                warn!(addr = %connection.addr(), error = %e, "daemon unreachable, retrying in background");
                connection.reconnect_in_background();
            }
        }

        Self {
            account: config.account,
            connection,
            router,
            cache,
            router_task: Mutex::new(Some(router_task)),
            started_at: Utc::now(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    /// Send a direct message.
    ///
    /// Handles found in the identity cache go out by opaque id; unknown
    /// handles go out as `username` and the daemon resolves them.
    pub async fn send_to_user(
        &self,
        message: &str,
        recipient: &str,
    ) -> Result<DeliveryReceipt, BridgeError> {
        if recipient.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("recipient is required".to_string()));
        }

        let parsed = ParticipantRef::parse(recipient);
        let by_name = matches!(parsed, ParticipantRef::Name(_));
        let target = parsed.normalize(&self.cache);
        let (key, address) = target.send_target();

        let mut params = json!({
            "account": self.account,
            "message": message,
        });
        params[key] = address;

        debug!(recipient, target = target.as_str(), "sending direct message");
        let result = self
            .connection
            .call("send", params)
            .await
            .map_err(|e| match e {
                // A handle the daemon cannot place is a resolution failure.
                ClientError::Rpc { message, .. } if by_name => {
                    BridgeError::RecipientResolution(message)
                }
                other => BridgeError::from(other),
            })?;

        let receipt = DeliveryReceipt::from_send_result(&result);
        self.learn_from_receipt(&receipt, by_name.then(|| recipient.trim()));

        if receipt.all_unregistered() {
            return Err(BridgeError::RecipientResolution(format!(
                "Recipient is not registered: {}",
                recipient
            )));
        }
        info!(recipient, timestamp = ?receipt.timestamp, "message sent");
        Ok(receipt)
    }

    /// Send to a group by base64 id or by name.
    pub async fn send_to_group(
        &self,
        message: &str,
        group: &str,
    ) -> Result<DeliveryReceipt, BridgeError> {
        let group_id = self.resolve_group(group).await?;
        let params = json!({
            "account": self.account,
            "message": message,
            "groupId": group_id,
        });

        debug!(group, group_id = %group_id, "sending group message");
        let result = self.connection.call("send", params).await?;
        let receipt = DeliveryReceipt::from_send_result(&result);
        self.learn_from_receipt(&receipt, None);
        info!(group, timestamp = ?receipt.timestamp, "group message sent");
        Ok(receipt)
    }

    /// Newest unseen buffered message, else block up to `timeout` for one.
    pub async fn receive_next(&self, timeout: Duration) -> Option<InboundMessage> {
        match self.router.next_unseen() {
            NextMessage::Ready(record) => Some(record),
            NextMessage::Pending(subscription) => subscription.recv(timeout.min(MAX_WAIT)).await,
        }
    }

    /// Block until a message from `from` (or anyone) arrives, up to `max_wait`.
    ///
    /// Receipts and typing indicators never satisfy the wait.
    pub async fn wait_for_message(
        &self,
        from: Option<&str>,
        max_wait: Duration,
    ) -> Option<InboundMessage> {
        let filter = SenderFilter::from_reference(from);
        debug!(filter = ?filter, max_wait_s = max_wait.as_secs(), "waiting for message");
        self.router
            .subscribe(filter)
            .recv(max_wait.min(MAX_WAIT))
            .await
    }

    /// Up to `limit` most recent inbound records, oldest first.
    pub fn get_history(&self, limit: usize) -> Vec<InboundMessage> {
        self.router.history(limit)
    }

    /// Groups from the daemon.
    pub async fn list_groups(&self) -> Result<Vec<GroupSummary>, BridgeError> {
        let result = self
            .connection
            .call("listGroups", json!({ "account": self.account }))
            .await?;
        let groups = result.as_array().ok_or_else(|| {
            BridgeError::Protocol(format!("listGroups returned {}", result))
        })?;

        Ok(groups
            .iter()
            .filter_map(|g| {
                let id = str_field(g, "id")?;
                Some(GroupSummary {
                    name: str_field(g, "name").unwrap_or_default(),
                    member_count: g
                        .get("members")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len),
                    id,
                })
            })
            .collect())
    }

    /// Groups plus direct contacts learned so far.
    pub async fn list_chats(&self) -> Result<ChatList, BridgeError> {
        let groups = self.list_groups().await?;
        let contacts = self
            .cache
            .entries()
            .into_iter()
            .map(|(id, handle)| ContactSummary { id, handle })
            .collect();
        Ok(ChatList { groups, contacts })
    }

    pub fn health(&self) -> HealthInfo {
        HealthInfo {
            pid: std::process::id(),
            started_at: self.started_at.to_rfc3339(),
            account: self.account.clone(),
            daemon_addr: self.connection.addr().to_string(),
            connected: self.connection.is_connected(),
            cache_entries: self.cache.len(),
            history_len: self.router.history_len(),
            active_waiters: self.router.waiter_count(),
        }
    }

    /// Close the connection, cancel waiters and stop the router.
    pub async fn shutdown(&self) {
        self.router.close();
        self.connection.close().await;
        let task = self
            .router_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!("bridge shut down");
    }

    async fn resolve_group(&self, group: &str) -> Result<String, BridgeError> {
        let group = group.trim();
        if group.is_empty() {
            return Err(BridgeError::InvalidArgument("group_id is required".to_string()));
        }
        if is_group_id(group) {
            return Ok(group.to_string());
        }

        let groups = self.list_groups().await?;
        groups
            .into_iter()
            .find(|g| g.name.eq_ignore_ascii_case(group))
            .map(|g| g.id)
            .ok_or_else(|| BridgeError::RecipientResolution(format!("Could not find group: {}", group)))
    }

    /// Record every (uuid, handle) pairing a send acknowledgment reveals.
    fn learn_from_receipt(&self, receipt: &DeliveryReceipt, sent_to_name: Option<&str>) {
        for status in &receipt.recipients {
            let Some(uuid) = status.uuid.as_deref() else {
                continue;
            };
            let handle = status
                .username
                .as_deref()
                .or(sent_to_name.filter(|_| receipt.recipients.len() == 1))
                .or(status.number.as_deref());
            if let Some(handle) = handle {
                self.cache.update(uuid, handle);
            }
        }
    }
}

/// Base64 group ids decode to 16 (legacy) or 32 bytes.
fn is_group_id(candidate: &str) -> bool {
    base64::engine::general_purpose::STANDARD
        .decode(candidate)
        .is_ok_and(|bytes| bytes.len() == 32 || bytes.len() == 16)
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
