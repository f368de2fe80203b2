#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

//! Stable priority queue backed by [`std::collections::BinaryHeap`].
//!
//! Items drain highest priority first. Items of equal priority drain in the
//! order they were pushed. Every push is stamped with a monotonically
//! increasing sequence number; an item that is popped and later
//! [`restore`](StableHeap::restore)d keeps its original sequence and therefore
//! its original place in line.
//!
//! # Complexity
//! - `push`: `O(log n)`
//! - `pop`: `O(log n)`
//! - `peek`: `O(1)`
//!
//! # Panic Safety
//! All provided APIs are panic-free.
//!
//! # Examples
//! ```
//! use cloudlink_common::collections::StableHeap;
//!
//! let mut heap = StableHeap::new();
//! heap.push(1, "low");
//! heap.push(5, "first high");
//! heap.push(5, "second high");
//!
//! assert_eq!(heap.pop().map(|r| r.item), Some("first high"));
//! assert_eq!(heap.pop().map(|r| r.item), Some("second high"));
//! assert_eq!(heap.pop().map(|r| r.item), Some("low"));
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// An item popped from a [`StableHeap`], together with its ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked<P, T> {
    /// Priority the item was pushed with.
    pub priority: P,
    /// Arrival sequence assigned at first push.
    pub sequence: u64,
    /// The queued value.
    pub item: T,
}

struct Entry<P, T>(Ranked<P, T>);

impl<P: Ord, T> PartialEq for Entry<P, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P: Ord, T> Eq for Entry<P, T> {}

impl<P: Ord, T> PartialOrd for Entry<P, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord, T> Ord for Entry<P, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (earlier arrival) first.
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// A max-priority queue that is FIFO among equal priorities.
pub struct StableHeap<P, T> {
    heap: BinaryHeap<Entry<P, T>>,
    next_sequence: u64,
}

impl<P: Ord, T> StableHeap<P, T> {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_sequence: 0 }
    }

    /// Creates an empty heap with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(capacity), next_sequence: 0 }
    }

    /// Adds a value and returns the arrival sequence assigned to it.
    pub fn push(&mut self, priority: P, item: T) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.heap.push(Entry(Ranked { priority, sequence, item }));
        sequence
    }

    /// Puts a previously popped value back at its original position.
    pub fn restore(&mut self, ranked: Ranked<P, T>) {
        self.heap.push(Entry(ranked));
    }

    /// Removes and returns the next value in drain order.
    pub fn pop(&mut self) -> Option<Ranked<P, T>> {
        self.heap.pop().map(|entry| entry.0)
    }

    /// Borrows the next value in drain order without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Ranked<P, T>> {
        self.heap.peek().map(|entry| &entry.0)
    }

    /// Returns the number of queued values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes every queued value.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Iterates over queued values in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Ranked<P, T>> {
        self.heap.iter().map(|entry| &entry.0)
    }

    /// Consumes the heap and returns its values in drain order.
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<Ranked<P, T>> {
        let mut data: Vec<Ranked<P, T>> =
            self.heap.into_sorted_vec().into_iter().map(|entry| entry.0).collect();
        data.reverse();
        data
    }
}

impl<P: Ord, T> Default for StableHeap<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Ord + fmt::Debug, T: fmt::Debug> fmt::Debug for StableHeap<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableHeap")
            .field("len", &self.len())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl<P: Ord, T> Extend<(P, T)> for StableHeap<P, T> {
    fn extend<I: IntoIterator<Item = (P, T)>>(&mut self, iter: I) {
        for (priority, item) in iter {
            self.push(priority, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &mut StableHeap<u8, &'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| heap.pop().map(|r| r.item)).collect()
    }

    #[test]
    fn drains_by_priority_then_arrival() {
        let mut heap = StableHeap::new();
        heap.extend([(1, "a"), (3, "b"), (1, "c"), (3, "d"), (2, "e")]);

        assert_eq!(drain(&mut heap), vec!["b", "d", "e", "a", "c"]);
    }

    #[test]
    fn restore_keeps_original_position() {
        let mut heap = StableHeap::new();
        heap.push(2, "first");
        heap.push(2, "second");

        let head = heap.pop().unwrap();
        heap.push(2, "third");
        heap.restore(head);

        assert_eq!(drain(&mut heap), vec!["first", "second", "third"]);
    }

    #[test]
    fn restored_low_priority_does_not_jump_ahead() {
        let mut heap = StableHeap::new();
        heap.push(1, "low");
        let low = heap.pop().unwrap();
        heap.push(9, "urgent");
        heap.restore(low);

        assert_eq!(heap.peek().map(|r| r.item), Some("urgent"));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn sequences_are_monotonic() {
        let mut heap = StableHeap::new();
        let a = heap.push(0, ());
        let b = heap.push(0, ());
        assert!(b > a);
    }

    #[test]
    fn into_sorted_vec_matches_drain_order() {
        let mut heap = StableHeap::new();
        heap.extend([(1, "x"), (5, "y"), (1, "z")]);
        let sorted: Vec<_> = heap.into_sorted_vec().into_iter().map(|r| r.item).collect();
        assert_eq!(sorted, vec!["y", "x", "z"]);
    }

    #[test]
    fn clear_empties_heap() {
        let mut heap: StableHeap<u8, u8> = StableHeap::with_capacity(4);
        heap.push(1, 1);
        heap.clear();
        assert!(heap.is_empty());
        assert!(heap.pop().is_none());
    }
}
