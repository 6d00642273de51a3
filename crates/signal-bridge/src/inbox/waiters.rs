//! Blocked consumers awaiting the next matching message.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::collections::VecDeque;

use tokio::sync::oneshot;

use super::record::InboundMessage;
use crate::identity::{IdentityCache, ParticipantRef};

/// Which senders a waiter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderFilter {
    Any,
    /// Phone number, opaque id or handle; compared after cache lookup.
    Participant(String),
}

impl SenderFilter {
    /// Blank references mean "any sender".
    pub fn from_reference(reference: Option<&str>) -> Self {
        match reference.map(str::trim) {
            Some(r) if !r.is_empty() => SenderFilter::Participant(r.to_string()),
            _ => SenderFilter::Any,
        }
    }

    pub fn matches(&self, record: &InboundMessage, cache: &IdentityCache) -> bool {
        let SenderFilter::Participant(raw) = self else {
            return true;
        };
        let sender = &record.sender;
        let normalized = ParticipantRef::parse(raw);
        if sender.is(raw) || sender.is(normalized.as_str()) {
            return true;
        }

        // handle -> cached id
        if let (Some(id), Some(uuid)) = (cache.resolve_name(raw), sender.uuid.as_deref()) {
            if id.eq_ignore_ascii_case(uuid) {
                return true;
            }
        }

        // sender id -> cached handle
        sender
            .uuid
            .as_deref()
            .and_then(|uuid| cache.name_for(uuid))
            .is_some_and(|name| name.eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    filter: SenderFilter,
    consume: bool,
    slot: oneshot::Sender<InboundMessage>,
}

/// Outcome of a successful hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub waiter_id: u64,
    /// The waiter takes the record out of the unseen pool.
    pub consume: bool,
}

/// Active waiters in registration order.
#[derive(Debug, Default)]
pub struct WaiterSet {
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

impl WaiterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        filter: SenderFilter,
        consume: bool,
    ) -> (u64, oneshot::Receiver<InboundMessage>) {
        self.next_id += 1;
        let (slot, rx) = oneshot::channel();
        self.waiters.push_back(Waiter {
            id: self.next_id,
            filter,
            consume,
            slot,
        });
        (self.next_id, rx)
    }

    /// Remove a waiter. Returns false when it was already gone.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Hand the record to the first live waiter whose filter matches.
    pub fn deliver(&mut self, record: &InboundMessage, cache: &IdentityCache) -> Option<Delivery> {
        self.waiters.retain(|w| !w.slot.is_closed());

        while let Some(index) = self
            .waiters
            .iter()
            .position(|w| w.filter.matches(record, cache))
        {
            let waiter = self.waiters.remove(index)?;
            if waiter.slot.send(record.clone()).is_ok() {
                return Some(Delivery {
                    waiter_id: waiter.id,
                    consume: waiter.consume,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Drop every waiter; their receivers observe cancellation.
    pub fn clear(&mut self) {
        self.waiters.clear();
    }
}
