//! Inbound side: record parsing, history, waiters and the router tying them together.

pub mod history;
pub mod record;
pub mod router;
pub mod waiters;

pub use history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
pub use record::{InboundMessage, MessageKind, SenderRef};
pub use router::{NextMessage, NotificationRouter, Subscription};
pub use waiters::SenderFilter;
