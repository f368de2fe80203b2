//! # CloudLink Domain
//!
//! Wire and data types for the CloudLink endpoint runtime.
//!
//! This crate contains:
//! - Message, storage-object, async-poll and diagnostics types
//! - Error taxonomy and Result definitions
//! - Configuration structures
//! - Library constants
//!
//! ## Architecture
//! - No dependencies on other CloudLink crates
//! - Only external dependencies allowed
//! - Pure data structures and validation

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
