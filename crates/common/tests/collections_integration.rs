//! Integration tests for the `collections` module.

use cloudlink_common::collections::{Ranked, StableHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Low,
    High,
}

/// Items re-inserted with `restore` keep their original arrival slot, so a
/// partially drained batch goes back in front of later arrivals.
#[test]
fn test_restored_items_precede_later_arrivals() {
    let mut heap = StableHeap::new();
    heap.push(Level::Low, "a");
    heap.push(Level::Low, "b");

    let taken: Vec<Ranked<Level, &str>> = std::iter::from_fn(|| heap.pop()).collect();
    heap.push(Level::Low, "c");
    for entry in taken.into_iter().rev() {
        heap.restore(entry);
    }

    let order: Vec<&str> = heap.into_sorted_vec().into_iter().map(|r| r.item).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[test]
fn test_priority_dominates_arrival_order() {
    let mut heap = StableHeap::with_capacity(4);
    heap.extend([(Level::Low, 1), (Level::High, 2), (Level::Low, 3), (Level::High, 4)]);

    assert_eq!(heap.len(), 4);
    assert_eq!(heap.peek().map(|r| r.item), Some(2));

    let order: Vec<i32> = std::iter::from_fn(|| heap.pop()).map(|r| r.item).collect();
    assert_eq!(order, vec![2, 4, 1, 3]);
    assert!(heap.is_empty());
}
