//! Persistent TCP client for the signal-cli daemon.
//!
//! One `DaemonConnection` owns one socket. Requests are correlated by a
//! monotonically allocated id; a background reader task resolves responses
//! and forwards everything else (pushed notifications) to a channel.
//!
//! CHANGELOG:
//! - 10/19/2026 - Cancelled calls no longer leak pending entries or half-written lines
//! - 10/19/2026 - Single-flight reconnection with exponential backoff
//! - 10/19/2026 - Multiplexed calls over one long-lived socket
//! - 10/19/2026 - Initial implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{looks_like_response, Incoming, Request, RpcErrorObject};

/// Default signal-cli daemon address.
pub const DEFAULT_DAEMON_ADDR: &str = "localhost:7583";

/// Errors that can occur when communicating with the daemon.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("JSON serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Malformed response from daemon: {0}")]
    Protocol(String),

    #[error("Timeout waiting for response to '{0}'")]
    Timeout(String),

    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Connection closed")]
    Closed,
}

impl ClientError {
    /// Stable error code, for structured error output.
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::Connection(_) => "CONNECT_FAILED",
            ClientError::Serialize(_) => "SERIALIZE_ERROR",
            ClientError::Protocol(_) => "PROTOCOL_ERROR",
            ClientError::Timeout(_) => "TIMEOUT",
            ClientError::Rpc { .. } => "RPC_ERROR",
            ClientError::Closed => "CLOSED",
        }
    }

    /// True when the link itself failed (as opposed to the daemon answering
    /// with an error).
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Closed)
    }
}

impl From<RpcErrorObject> for ClientError {
    fn from(err: RpcErrorObject) -> Self {
        ClientError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Daemon address (host:port)
    pub addr: String,
    /// Dial attempts per `connect()` before giving up
    pub connect_attempts: u32,
    /// Delay before the first retry; doubles on each failure
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay
    pub max_backoff: Duration,
    /// Deadline for a single call
    pub call_timeout: Duration,
}

impl ConnectionConfig {
    /// Settings for the given address with default retry and timeout values.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DAEMON_ADDR)
    }
}

/// Receiving end of the unsolicited-frame stream.
pub type NotificationStream = mpsc::UnboundedReceiver<Value>;

struct PendingRequest {
    method: String,
    generation: u64,
    created_at: Instant,
    responder: oneshot::Sender<Result<Value, ClientError>>,
}

#[derive(Default)]
struct Link {
    writer: Option<OwnedWriteHalf>,
    reader_task: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared {
    config: ConnectionConfig,
    next_id: AtomicU64,
    link: tokio::sync::Mutex<Link>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    notifications: mpsc::UnboundedSender<Value>,
    connected: AtomicBool,
    closed: AtomicBool,
    reconnecting: AtomicBool,
}

/// Handle to the daemon connection. Cheap to clone; all clones share one socket.
#[derive(Clone)]
pub struct DaemonConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DaemonConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConnection")
            .field("addr", &self.shared.config.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl DaemonConnection {
    /// Create an unconnected client and the stream its notifications arrive on.
    pub fn new(config: ConnectionConfig) -> (Self, NotificationStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            config,
            next_id: AtomicU64::new(1),
            link: tokio::sync::Mutex::new(Link::default()),
            pending: Mutex::new(HashMap::new()),
            notifications: tx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Daemon address this client dials.
    pub fn addr(&self) -> &str {
        &self.shared.config.addr
    }

    /// Whether a socket is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// Establish the socket. No-op when already connected.
    ///
    /// Reopens a connection that was previously `close()`d.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.shared.closed.store(false, Ordering::Release);
        self.shared.ensure_connected().await.map(drop)
    }

    /// Keep retrying the connection in the background until it succeeds.
    ///
    /// Only one reconnection loop runs at a time.
    pub fn reconnect_in_background(&self) {
        self.shared.spawn_reconnect();
    }

    /// Send a request and wait for its response.
    ///
    /// Connects first if needed. Concurrent callers only serialize around
    /// the socket write; the waits run independently.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let shared = &self.shared;
        let (tx, rx) = oneshot::channel();
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let line = Request::new(id, method, params)
            .to_ndjson_line()
            .map_err(ClientError::Serialize)?;

        // Armed before the entry exists, so a cancelled call never leaks it.
        let _guard = PendingGuard {
            shared: shared.as_ref(),
            id,
        };

        {
            let mut link = shared.ensure_connected().await?;
            shared.lock_pending().insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    generation: link.generation,
                    created_at: Instant::now(),
                    responder: tx,
                },
            );

            let mut write = WriteGuard {
                shared,
                link: &mut *link,
                finished: false,
            };
            let Some(writer) = write.link.writer.as_mut() else {
                write.finished = true;
                return Err(ClientError::Closed);
            };

            debug!(id, method, "sending request");
            let written = write_line(writer, &line).await;
            write.finished = true;
            if let Err(e) = written {
                warn!(id, method, error = %e, "write to daemon failed");
                shared.drop_link(&mut *write.link, "write to daemon failed");
                return Err(ClientError::Connection(format!("write to daemon failed: {}", e)));
            }
        }

        match tokio::time::timeout(shared.config.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Connection(
                "connection dropped before response".to_string(),
            )),
            Err(_) => {
                warn!(id, method, "call timed out");
                Err(ClientError::Timeout(method.to_string()))
            }
        }
    }

    /// Close the socket and fail every in-flight call.
    pub async fn close(&self) {
        let shared = &self.shared;
        shared.closed.store(true, Ordering::Release);
        {
            let mut link = shared.link.lock().await;
            if let Some(mut writer) = link.writer.take() {
                let _ = writer.shutdown().await;
            }
            if let Some(task) = link.reader_task.take() {
                task.abort();
            }
            shared.connected.store(false, Ordering::Release);
        }
        shared.fail_pending(|_| true, || ClientError::Closed);
        info!(addr = %shared.config.addr, "daemon connection closed");
    }
}

/// Tears the link down when a write is abandoned part way, so no partial
/// line stays on the socket ahead of the next request.
struct WriteGuard<'a> {
    shared: &'a Shared,
    link: &'a mut Link,
    finished: bool,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("request write cancelled; dropping connection");
            // The next call redials.
            self.shared.teardown_link(&mut *self.link, "request write cancelled");
        }
    }
}

/// Removes a pending entry when its caller stops waiting (timeout or cancel).
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock_pending().remove(&self.id);
    }
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the link, dialing first when there is no socket.
    async fn ensure_connected(
        self: &Arc<Self>,
    ) -> Result<tokio::sync::MutexGuard<'_, Link>, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        let mut link = self.link.lock().await;
        if link.writer.is_some() {
            return Ok(link);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        let stream = self.dial().await?;
        let (read_half, write_half) = stream.into_split();
        link.generation += 1;
        let generation = link.generation;
        link.writer = Some(write_half);
        link.reader_task = Some(tokio::spawn(reader_loop(
            Arc::clone(self),
            read_half,
            generation,
        )));
        self.connected.store(true, Ordering::Release);
        info!(addr = %self.config.addr, generation, "connected to daemon");
        Ok(link)
    }

    async fn dial(&self) -> Result<TcpStream, ClientError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut delay = self.config.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match TcpStream::connect(&self.config.addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(addr = %self.config.addr, attempt, attempts, error = %e, "daemon connect failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(self.config.max_backoff);
                    }
                }
            }
        }

        Err(ClientError::Connection(format!(
            "daemon unreachable at {}: {}",
            self.config.addr, last_error
        )))
    }

    /// Tear down the current socket after a write failure.
    fn drop_link(self: &Arc<Self>, link: &mut Link, reason: &str) {
        self.teardown_link(link, reason);
        if !self.closed.load(Ordering::Acquire) {
            self.spawn_reconnect();
        }
    }

    /// Forget the socket and fail its in-flight calls, without redialing.
    fn teardown_link(&self, link: &mut Link, reason: &str) {
        link.writer = None;
        if let Some(task) = link.reader_task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Release);
        let generation = link.generation;
        self.fail_pending(
            |p| p.generation == generation,
            || ClientError::Connection(reason.to_string()),
        );
    }

    /// Called by the reader task once its socket is gone.
    async fn on_reader_exit(self: &Arc<Self>, generation: u64) {
        {
            let mut link = self.link.lock().await;
            if link.generation == generation && link.writer.is_some() {
                link.writer = None;
                link.reader_task = None;
                self.connected.store(false, Ordering::Release);
            }
        }
        self.fail_pending(
            |p| p.generation == generation,
            || ClientError::Connection("daemon connection lost".to_string()),
        );
        if !self.closed.load(Ordering::Acquire) {
            self.spawn_reconnect();
        }
    }

    fn fail_pending<P, E>(&self, mut predicate: P, make_error: E)
    where
        P: FnMut(&PendingRequest) -> bool,
        E: Fn() -> ClientError,
    {
        let failed: Vec<(u64, PendingRequest)> = {
            let mut pending = self.lock_pending();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| predicate(p))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        for (id, p) in failed {
            debug!(id, method = %p.method, "failing pending request");
            let _ = p.responder.send(Err(make_error()));
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let mut delay = shared.config.initial_backoff;
            loop {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                tokio::time::sleep(delay).await;
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                match shared.ensure_connected().await.map(drop) {
                    Ok(()) => {
                        shared.reconnecting.store(false, Ordering::Release);
                        // The fresh socket may already have dropped again.
                        if shared.connected.load(Ordering::Acquire)
                            || shared.closed.load(Ordering::Acquire)
                            || shared.reconnecting.swap(true, Ordering::AcqRel)
                        {
                            return;
                        }
                        delay = shared.config.initial_backoff;
                    }
                    Err(e) => {
                        warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "reconnect failed");
                        delay = (delay * 2).min(shared.config.max_backoff);
                    }
                }
            }
            shared.reconnecting.store(false, Ordering::Release);
        });
    }

    /// Classify one line: resolve a pending call or forward it as a notification.
    fn route_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame from daemon");
                return;
            }
        };

        if looks_like_response(&value) {
            if let Some(id) = value.get("id").and_then(Value::as_u64) {
                let pending = self.lock_pending().remove(&id);
                if let Some(p) = pending {
                    debug!(
                        id,
                        method = %p.method,
                        elapsed_ms = p.created_at.elapsed().as_millis() as u64,
                        "matched response"
                    );
                    let outcome = match Incoming::classify(value) {
                        Incoming::Response { outcome, .. } => outcome.map_err(ClientError::from),
                        Incoming::Notification(frame) => {
                            Err(ClientError::Protocol(frame.to_string()))
                        }
                    };
                    let _ = p.responder.send(outcome);
                    return;
                }
                debug!(id, "response has no pending request; forwarding");
            }
        }

        if self.notifications.send(value).is_err() {
            debug!("notification dropped: no listener attached");
        }
    }
}

async fn reader_loop(shared: Arc<Shared>, read_half: OwnedReadHalf, generation: u64) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!(generation, "daemon closed connection");
                break;
            }
            Ok(_) => match std::str::from_utf8(&buf) {
                Ok(line) => shared.route_line(line),
                Err(e) => warn!(error = %e, "dropping non-UTF-8 frame from daemon"),
            },
            Err(e) => {
                warn!(generation, error = %e, "daemon read failed");
                break;
            }
        }
    }
    shared.on_reader_exit(generation).await;
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
