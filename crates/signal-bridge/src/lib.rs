//! signal-bridge - agent-facing messaging over the signal-cli JSON-RPC daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

pub mod config;
pub mod daemon;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod messaging;
pub mod output;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use identity::{IdentityCache, ParticipantRef};
pub use inbox::{InboundMessage, MessageKind, NotificationRouter, SenderFilter};
pub use messaging::{DeliveryReceipt, SignalBridge, MAX_WAIT};
