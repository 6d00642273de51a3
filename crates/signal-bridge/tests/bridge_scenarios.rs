//! End-to-end scenarios against a fake signal-cli daemon on a local TCP port.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use signal_bridge::{BridgeConfig, BridgeError, IdentityCache, SignalBridge};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const SEND_TIMESTAMP: i64 = 1_700_000_000_123;

fn group_id() -> String {
    base64::engine::general_purpose::STANDARD.encode([42u8; 32])
}

/// Minimal daemon: answers `send` and `listGroups`, records every request,
/// and lets the test push notification lines.
struct FakeDaemon {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl FakeDaemon {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let current = Arc::new(Mutex::new(None));

        let (reqs, cur) = (Arc::clone(&requests), Arc::clone(&current));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, Arc::clone(&reqs), Arc::clone(&cur)));
            }
        });

        Self {
            addr,
            requests,
            current,
        }
    }

    async fn wait_for_client(&self) {
        let current = Arc::clone(&self.current);
        eventually("daemon to accept", move || current.lock().unwrap().is_some()).await;
    }

    fn push(&self, frame: Value) {
        let sender = self.current.lock().unwrap().clone();
        sender
            .expect("no client connected")
            .send(format!("{}\n", frame))
            .unwrap();
    }

    fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r["method"] == method)
            .cloned()
            .collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    requests: Arc<Mutex<Vec<Value>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    *current.lock().unwrap() = Some(out_tx.clone());

    tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let request: Value = serde_json::from_str(&line).unwrap();
        requests.lock().unwrap().push(request.clone());
        let _ = out_tx.send(format!("{}\n", respond(&request)));
    }
}

fn respond(request: &Value) -> Value {
    let id = request["id"].clone();
    let params = &request["params"];

    match request["method"].as_str() {
        Some("send") => {
            let results = if let Some(name) = params["username"][0].as_str() {
                if name.starts_with("ghost") {
                    return json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -1, "message": format!("Username not found: {}", name)}
                    });
                }
                json!([{"recipientAddress": {"uuid": format!("uuid-{}", name)}, "type": "SUCCESS"}])
            } else if let Some(recipient) = params["recipient"][0].as_str() {
                if recipient == "+15550000000" {
                    json!([{"recipientAddress": {"number": recipient}, "type": "UNREGISTERED_FAILURE"}])
                } else {
                    json!([{"recipientAddress": {"uuid": "uuid-phone", "number": recipient}, "type": "SUCCESS"}])
                }
            } else {
                json!([])
            };
            json!({"jsonrpc": "2.0", "id": id, "result": {"timestamp": SEND_TIMESTAMP, "results": results}})
        }
        Some("listGroups") => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": [
                {"id": group_id(), "name": "Team", "members": [{"number": "+15551234567"}, {"number": "+15557654321"}]}
            ]
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not implemented"}
        }),
    }
}

fn config_for(addr: SocketAddr) -> BridgeConfig {
    let mut config = BridgeConfig::new("+15559990000");
    config.host = addr.ip().to_string();
    config.port = addr.port();
    config.connect_attempts = 1;
    config.initial_backoff_ms = 20;
    config.call_timeout = 5;
    config
}

async fn start_bridge(daemon: &FakeDaemon) -> SignalBridge {
    let bridge =
        SignalBridge::start_with_cache(config_for(daemon.addr), Arc::new(IdentityCache::in_memory()))
            .await;
    daemon.wait_for_client().await;
    bridge
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_send_while_disconnected_then_after_reconnect() {
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };
    let bridge =
        SignalBridge::start_with_cache(config_for(addr), Arc::new(IdentityCache::in_memory())).await;
    assert!(!bridge.is_connected());

    let err = bridge.send_to_user("hello", "+15551234567").await.unwrap_err();
    assert!(matches!(err, BridgeError::Connection(_)), "got {:?}", err);

    let daemon = FakeDaemon::serve(TcpListener::bind(addr).await.unwrap());
    eventually("reconnect", || bridge.is_connected()).await;

    let receipt = bridge.send_to_user("hello", "+15551234567").await.unwrap();
    assert_eq!(receipt.timestamp, Some(SEND_TIMESTAMP));

    let sends = daemon.requests("send");
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["params"]["recipient"], json!(["+15551234567"]));
    assert_eq!(sends[0]["params"]["account"], "+15559990000");
    assert_eq!(sends[0]["params"]["message"], "hello");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_receive_notification_resolves_waiter_and_caches_identity() {
    let daemon = FakeDaemon::start().await;
    let bridge = Arc::new(start_bridge(&daemon).await);

    let waiting = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            bridge
                .wait_for_message(Some("+15551234567"), Duration::from_secs(10))
                .await
        })
    };
    eventually("waiter registration", || bridge.router().waiter_count() == 1).await;

    daemon.push(json!({
        "jsonrpc": "2.0",
        "method": "receive",
        "params": {"source": "+15551234567", "sourceUuid": "abc-123", "message": "hi"}
    }));

    let record = waiting.await.unwrap().expect("waiter should be satisfied");
    assert_eq!(record.body, "hi");
    assert_eq!(record.sender.sender_id(), "+15551234567");
    assert_eq!(bridge.get_history(10).len(), 1);
    assert_eq!(
        bridge.cache().resolve_name("+15551234567"),
        Some("abc-123".to_string())
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_receipt_never_satisfies_wait() {
    let daemon = FakeDaemon::start().await;
    let bridge = Arc::new(start_bridge(&daemon).await);

    let waiting = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            bridge
                .wait_for_message(Some("+15551234567"), Duration::from_secs(10))
                .await
        })
    };
    eventually("waiter registration", || bridge.router().waiter_count() == 1).await;

    daemon.push(json!({
        "jsonrpc": "2.0",
        "method": "receive",
        "params": {"envelope": {
            "sourceNumber": "+15551234567",
            "sourceUuid": "abc-123",
            "receiptMessage": {"isDelivery": true, "timestamps": [SEND_TIMESTAMP]}
        }}
    }));
    daemon.push(json!({
        "jsonrpc": "2.0",
        "method": "receive",
        "params": {"envelope": {
            "sourceNumber": "+15551234567",
            "sourceUuid": "abc-123",
            "sourceName": "alice.01",
            "timestamp": SEND_TIMESTAMP + 1,
            "dataMessage": {"message": "actual reply"}
        }}
    }));

    let record = waiting.await.unwrap().unwrap();
    assert_eq!(record.body, "actual reply");
    assert_eq!(bridge.get_history(10).len(), 2);
    assert_eq!(bridge.cache().name_for("abc-123"), Some("alice.01".to_string()));

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_username_send_learns_identity() {
    let daemon = FakeDaemon::start().await;
    let bridge = start_bridge(&daemon).await;

    bridge.send_to_user("first", "alice.01").await.unwrap();
    assert_eq!(
        bridge.cache().resolve_name("alice.01"),
        Some("uuid-alice.01".to_string())
    );

    bridge.send_to_user("second", "alice.01").await.unwrap();

    let sends = daemon.requests("send");
    assert_eq!(sends[0]["params"]["username"], json!(["alice.01"]));
    assert_eq!(sends[1]["params"]["recipient"], json!(["uuid-alice.01"]));
    assert!(sends[1]["params"].get("username").is_none());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_unknown_username_is_resolution_error() {
    let daemon = FakeDaemon::start().await;
    let bridge = start_bridge(&daemon).await;

    let err = bridge.send_to_user("hi", "ghost.99").await.unwrap_err();
    match err {
        BridgeError::RecipientResolution(message) => {
            assert_eq!(message, "Username not found: ghost.99")
        }
        other => panic!("expected resolution error, got {:?}", other),
    }

    let err = bridge.send_to_user("hi", "+15550000000").await.unwrap_err();
    assert!(matches!(err, BridgeError::RecipientResolution(_)));

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_group_send_by_name_and_id() {
    let daemon = FakeDaemon::start().await;
    let bridge = start_bridge(&daemon).await;

    bridge.send_to_group("hello team", "team").await.unwrap();
    bridge.send_to_group("hello again", &group_id()).await.unwrap();

    let sends = daemon.requests("send");
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0]["params"]["groupId"], group_id());
    assert_eq!(sends[1]["params"]["groupId"], group_id());
    assert_eq!(daemon.requests("listGroups").len(), 1);

    let err = bridge.send_to_group("hi", "Nope").await.unwrap_err();
    assert_eq!(err.to_string(), "Could not find group: Nope");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_list_chats_merges_groups_and_contacts() {
    let daemon = FakeDaemon::start().await;
    let bridge = start_bridge(&daemon).await;
    bridge.cache().update("abc-123", "alice.01");

    let chats = bridge.list_chats().await.unwrap();
    assert_eq!(chats.groups.len(), 1);
    assert_eq!(chats.groups[0].name, "Team");
    assert_eq!(chats.groups[0].member_count, 2);
    assert_eq!(chats.contacts.len(), 1);
    assert_eq!(chats.contacts[0].handle, "alice.01");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_receive_next_returns_buffered_then_waits() {
    let daemon = FakeDaemon::start().await;
    let bridge = Arc::new(start_bridge(&daemon).await);

    daemon.push(json!({
        "jsonrpc": "2.0",
        "method": "receive",
        "params": {"source": "+15551234567", "sourceUuid": "abc-123", "message": "buffered"}
    }));
    eventually("buffered message", || bridge.get_history(10).len() == 1).await;

    let first = bridge.receive_next(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.body, "buffered");

    // Already seen, so nothing comes back before the deadline.
    assert!(bridge.receive_next(Duration::from_millis(50)).await.is_none());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_waiters() {
    let daemon = FakeDaemon::start().await;
    let bridge = Arc::new(start_bridge(&daemon).await);

    let waiting = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.wait_for_message(None, Duration::from_secs(3600)).await })
    };
    eventually("waiter registration", || bridge.router().waiter_count() == 1).await;

    bridge.shutdown().await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("wait should end on shutdown")
        .unwrap();
    assert!(outcome.is_none());
    assert!(matches!(
        bridge.send_to_user("late", "+15551234567").await,
        Err(BridgeError::Connection(_))
    ));
}

#[tokio::test]
async fn test_cache_persists_learned_identities() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("username_cache.json");

    let daemon = FakeDaemon::start().await;
    let mut config = config_for(daemon.addr);
    config.cache_path = Some(cache_path.to_string_lossy().to_string());
    let bridge = SignalBridge::start(config).await;
    daemon.wait_for_client().await;

    daemon.push(json!({
        "jsonrpc": "2.0",
        "method": "receive",
        "params": {"envelope": {
            "sourceNumber": "+15551234567",
            "sourceUuid": "abc-123",
            "sourceName": "alice.01",
            "dataMessage": {"message": "hi"}
        }}
    }));
    eventually("identity learned", || bridge.cache().len() == 1).await;
    bridge.shutdown().await;

    let reloaded = IdentityCache::load(&cache_path);
    assert_eq!(reloaded.resolve_name("alice.01"), Some("abc-123".to_string()));
}
