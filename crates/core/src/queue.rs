//! FIFO of task ids awaiting assignment.
//!
//! The queue holds ids only; the task records live in the store. It has no
//! locking of its own and is only ever touched under the store's lock, which
//! is what makes concurrent dequeues mutually exclusive.

use std::collections::VecDeque;

use crate::types::TaskId;

#[derive(Debug, Default)]
pub struct PendingQueue {
    ids: VecDeque<TaskId>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id at the tail.
    pub fn enqueue(&mut self, id: TaskId) {
        self.ids.push_back(id);
    }

    /// Remove and return the head, if any.
    pub fn dequeue(&mut self) -> Option<TaskId> {
        self.ids.pop_front()
    }

    /// Remove a specific id wherever it sits. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.ids.iter().position(|queued| queued == id) {
            Some(index) => self.ids.remove(index).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
