use crate::types::InventoryLogEntry;
use std::collections::VecDeque;

pub const MAX_LOG_ENTRIES: usize = 20;

/// Bounded, newest-first history of accepted inventory updates.
#[derive(Debug)]
pub struct InventoryLog {
    entries: VecDeque<InventoryLogEntry>,
    capacity: usize,
}

impl Default for InventoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry once over capacity.
    pub fn record(&mut self, entry: InventoryLogEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &InventoryLogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&InventoryLogEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
