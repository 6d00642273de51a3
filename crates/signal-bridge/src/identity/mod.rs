//! Participant identity: reference parsing and the persisted id/handle cache.

pub mod cache;
pub mod reference;

pub use cache::{default_cache_path, IdentityCache};
pub use reference::ParticipantRef;
