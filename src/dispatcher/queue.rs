//! Pending task queue
//!
//! An ordered, deduplicated FIFO of task identifiers that have not been
//! dispatched yet. Only pending entries are tracked: once an identifier is
//! popped it may be appended again later.

use std::collections::{HashSet, VecDeque};

/// FIFO of pending task identifiers with insertion-time deduplication
#[derive(Debug, Default, Clone)]
pub struct TaskQueue {
    /// Pending identifiers in first-insertion order
    pending: VecDeque<String>,

    /// Membership index over `pending`
    index: HashSet<String>,
}

impl TaskQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an identifier unless it is already pending
    ///
    /// # Returns
    ///
    /// * `true` - The identifier was added at the tail
    /// * `false` - The identifier was already pending and was dropped
    pub fn append(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.pending.push_back(id);
        true
    }

    /// Removes and returns the earliest pending identifier
    pub fn pop_front(&mut self) -> Option<String> {
        let id = self.pending.pop_front()?;
        self.index.remove(&id);
        Some(id)
    }

    /// Returns the number of pending identifiers
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    /// Returns whether no identifiers are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns whether `id` is currently pending
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }
}

impl<S: Into<String>> Extend<S> for TaskQueue {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for id in iter {
            self.append(id);
        }
    }
}
