//! JSON-RPC 2.0 transport for the signal-cli daemon.
//!
//! `protocol` holds the wire frames; `client` holds the persistent,
//! multiplexed `DaemonConnection` that correlates responses and forwards
//! pushed notifications.

pub mod client;
pub mod protocol;

// Re-export commonly used types
pub use client::{ClientError, ConnectionConfig, DaemonConnection, NotificationStream};
pub use protocol::{Incoming, Request, RpcErrorObject};
