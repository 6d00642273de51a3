//! Rolling buffer of recent inbound records.
//!
//! CHANGELOG:
//! - 10/19/2026 - Per-entry seen flag for receive_message polling
//! - 10/19/2026 - Initial implementation

use std::collections::VecDeque;

use super::record::InboundMessage;

/// Default number of records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
struct Entry {
    record: InboundMessage,
    seen: bool,
}

/// Bounded, arrival-ordered history. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a record, evicting the oldest past capacity.
    pub fn push(&mut self, record: InboundMessage, seen: bool) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry { record, seen });
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<InboundMessage> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries
            .iter()
            .skip(skip)
            .map(|e| e.record.clone())
            .collect()
    }

    /// Newest message-kind record not yet handed out, marked seen on return.
    pub fn take_newest_unseen(&mut self) -> Option<InboundMessage> {
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| !e.seen && e.record.is_message())?;
        entry.seen = true;
        Some(entry.record.clone())
    }

    /// Return a record to the unseen pool (its consumer went away).
    pub fn mark_unseen(&mut self, seq: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.record.seq == seq) {
            entry.seen = false;
        }
    }
}
