//! Specialized data structures
//!
//! - **[`priority_queue`]**: stable max-heap (priority, then arrival order)

pub mod priority_queue;

// Re-export commonly used types
pub use priority_queue::{Ranked, StableHeap};
