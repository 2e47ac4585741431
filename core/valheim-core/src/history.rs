//! Fixed-capacity FIFO used for the attempt history and the raw line buffer.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an entry, evicting the oldest ones once capacity is exceeded.
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn newest_first(&self) -> Vec<T> {
        self.entries.iter().rev().cloned().collect()
    }

    /// The newest `limit` entries in arrival order.
    pub fn tail(&self, limit: usize) -> Vec<T> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(start).cloned().collect()
    }
}
