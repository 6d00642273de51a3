//! Notification router - drains the daemon's push stream into history and waiters.
//!
//! CHANGELOG:
//! - 10/19/2026 - Ingest on the blocking pool; close() for shutdown
//! - 10/19/2026 - Push delivery to subscribed waiters replaces queue polling
//! - 10/19/2026 - Initial implementation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use signal_rpc::protocol::looks_like_response;
use signal_rpc::NotificationStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::history::HistoryBuffer;
use super::record::InboundMessage;
use super::waiters::{SenderFilter, WaiterSet};
use crate::identity::IdentityCache;

#[derive(Debug)]
struct RouterState {
    history: HistoryBuffer,
    waiters: WaiterSet,
    next_seq: u64,
    closed: bool,
}

type SharedState = Arc<Mutex<RouterState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RouterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of `NotificationRouter::next_unseen`.
#[derive(Debug)]
pub enum NextMessage {
    /// An unseen record was already buffered.
    Ready(InboundMessage),
    /// Nothing buffered; wait on this.
    Pending(Subscription),
}

/// Owns the history buffer and the waiter set.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    state: SharedState,
    cache: Arc<IdentityCache>,
}

impl NotificationRouter {
    pub fn new(cache: Arc<IdentityCache>, history_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RouterState {
                history: HistoryBuffer::new(history_capacity),
                waiters: WaiterSet::new(),
                next_seq: 0,
                closed: false,
            })),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Drain the transport's notification stream until it closes.
    ///
    /// Each frame is ingested on the blocking pool, one at a time, since a
    /// cache update rewrites the cache file.
    pub fn spawn(&self, mut notifications: NotificationStream) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            info!("notification router started");
            while let Some(frame) = notifications.recv().await {
                let router = router.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || router.ingest(frame)).await {
                    warn!(error = %e, "notification ingestion failed");
                }
            }
            info!("notification stream ended");
        })
    }

    /// Process one unsolicited frame. Returns the stored record, if any.
    pub fn ingest(&self, frame: Value) -> Option<InboundMessage> {
        if looks_like_response(&frame) {
            warn!(frame = %frame, "ignoring response frame on notification path");
            return None;
        }
        match frame.get("method").and_then(Value::as_str) {
            Some("receive") => {}
            method => {
                debug!(method = ?method, "ignoring notification");
                return None;
            }
        }

        let params = frame.get("params").unwrap_or(&Value::Null);
        // Some daemon versions nest the envelope one level deeper.
        let params = params
            .get("result")
            .filter(|r| r.get("envelope").is_some())
            .unwrap_or(params);
        let mut record = InboundMessage::from_receive_params(params);

        if let Some((id, handle)) = record.identity_pair() {
            self.cache.update(id, handle);
        }

        let mut state = lock(&self.state);
        state.next_seq += 1;
        record.seq = state.next_seq;

        let delivery = if record.is_message() {
            state.waiters.deliver(&record, &self.cache)
        } else {
            None
        };
        state
            .history
            .push(record.clone(), delivery.is_some_and(|d| d.consume));

        debug!(
            seq = record.seq,
            kind = ?record.kind,
            sender = record.sender.sender_id(),
            delivered = delivery.is_some(),
            "ingested notification"
        );
        Some(record)
    }

    /// Register a waiter for the next matching message. Does not consume.
    pub fn subscribe(&self, filter: SenderFilter) -> Subscription {
        let mut state = lock(&self.state);
        self.register(&mut state, filter, false)
    }

    /// Take the newest unseen message, or register a consuming waiter if
    /// there is none. Both happen under one lock so nothing slips between.
    pub fn next_unseen(&self) -> NextMessage {
        let mut state = lock(&self.state);
        match state.history.take_newest_unseen() {
            Some(record) => NextMessage::Ready(record),
            None => NextMessage::Pending(self.register(&mut state, SenderFilter::Any, true)),
        }
    }

    fn register(&self, state: &mut RouterState, filter: SenderFilter, consume: bool) -> Subscription {
        let (id, rx) = if state.closed {
            // Sender dropped here, so the receiver resolves empty at once.
            let (_slot, rx) = oneshot::channel();
            (0, rx)
        } else {
            state.waiters.register(filter, consume)
        };
        Subscription {
            id,
            consume,
            rx,
            state: Arc::clone(&self.state),
            finished: false,
        }
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn history(&self, limit: usize) -> Vec<InboundMessage> {
        lock(&self.state).history.recent(limit)
    }

    pub fn history_len(&self) -> usize {
        lock(&self.state).history.len()
    }

    pub fn waiter_count(&self) -> usize {
        lock(&self.state).waiters.len()
    }

    /// Cancel every waiter. Blocked receivers return empty.
    pub fn cancel_waiters(&self) {
        Self::clear_waiters(&mut lock(&self.state));
    }

    /// Cancel every waiter and refuse new ones. Later waits return empty
    /// immediately; buffered history stays readable.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        Self::clear_waiters(&mut state);
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn clear_waiters(state: &mut RouterState) {
        let count = state.waiters.len();
        state.waiters.clear();
        if count > 0 {
            info!(count, "cancelled waiters");
        }
    }
}

/// A registered waiter. Dropping it unregisters.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    consume: bool,
    rx: oneshot::Receiver<InboundMessage>,
    state: SharedState,
    finished: bool,
}

impl Subscription {
    /// Wait up to `timeout` for delivery. `None` on expiry or cancellation.
    pub async fn recv(mut self, timeout: Duration) -> Option<InboundMessage> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(record)) => {
                self.finished = true;
                Some(record)
            }
            Ok(Err(_)) => {
                self.finished = true;
                debug!(waiter = self.id, "waiter cancelled");
                None
            }
            Err(_) => {
                // Unregister first; a delivery that beat us is still in the slot.
                lock(&self.state).waiters.remove(self.id);
                self.finished = true;
                match self.rx.try_recv() {
                    Ok(record) => Some(record),
                    Err(_) => {
                        debug!(waiter = self.id, "waiter expired");
                        None
                    }
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = lock(&self.state);
        state.waiters.remove(self.id);
        if let Ok(record) = self.rx.try_recv() {
            if self.consume {
                state.history.mark_unseen(record.seq);
            }
        }
    }
}
