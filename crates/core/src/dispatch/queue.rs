//! Priority-ordered outbound queue

use cloudlink_common::collections::{Ranked, StableHeap};
use cloudlink_domain::{CloudLinkError, Message, Priority, Result};

/// A queued message plus the delivery metadata the dispatcher owns
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    /// Failed delivery attempts so far
    pub attempts: u32,
}

pub type QueueEntry = Ranked<Priority, QueuedMessage>;

/// Drains highest priority first, FIFO among equal priorities
///
/// Entries taken out for delivery and put back with [`OutboundQueue::restore`]
/// keep their original arrival rank, so a retried message stays ahead of
/// anything queued after it.
#[derive(Debug)]
pub struct OutboundQueue {
    heap: StableHeap<Priority, QueuedMessage>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self { heap: StableHeap::new(), capacity }
    }

    /// # Errors
    /// Returns `CloudLinkError::Rejected` when the queue is full.
    pub fn push(&mut self, message: Message) -> Result<()> {
        if self.heap.len() >= self.capacity {
            return Err(CloudLinkError::Rejected(format!(
                "outbound queue full ({} messages)",
                self.capacity
            )));
        }
        let priority = message.priority;
        self.heap.push(priority, QueuedMessage { message, attempts: 0 });
        Ok(())
    }

    /// Remove up to `max` entries in drain order.
    pub fn take(&mut self, max: usize) -> Vec<QueueEntry> {
        let mut batch = Vec::with_capacity(max.min(self.heap.len()));
        while batch.len() < max {
            match self.heap.pop() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        batch
    }

    /// Put an entry back at its original rank. Ignores capacity.
    pub fn restore(&mut self, entry: QueueEntry) {
        self.heap.restore(entry);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
