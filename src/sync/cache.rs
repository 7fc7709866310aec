// Message Cache - bounded FIFO of seen messages
//
// Keys are indexed in a set alongside the ordered entries so that the
// duplicate check is O(1) while eviction stays strictly oldest-first.

use crate::protocol::{Message, MessageKey};
use std::collections::{HashSet, VecDeque};

/// Insertion-ordered message cache with strict FIFO eviction
#[derive(Debug, Clone)]
pub struct MessageCache {
    capacity: usize,
    entries: VecDeque<Message>,
    keys: HashSet<MessageKey>,
}

impl MessageCache {
    /// Create an empty cache holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            keys: HashSet::new(),
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

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.keys.contains(key)
    }

    /// Append a message, evicting the oldest entry when full
    ///
    /// Returns false and leaves the cache untouched if the key is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let key = message.key();
        if self.keys.contains(&key) {
            return false;
        }

        while self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.keys.remove(&evicted.key());
            }
        }

        self.keys.insert(key);
        self.entries.push_back(message);
        true
    }

    /// Copy of every entry, oldest first
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    /// Keys of every entry, oldest first
    pub fn keys(&self) -> Vec<MessageKey> {
        self.entries.iter().map(Message::key).collect()
    }
}
