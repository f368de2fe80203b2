//! Time utilities
//!
//! - **[`interval`]**: recurring tick sources with a delayed first tick

pub mod interval;

pub use interval::{Interval, IntervalConfig};
