//! Polling of long-running server operations
//!
//! Each tracked request moves PENDING → {COMPLETE, TIMEOUT, ERROR} exactly
//! once. The deadline is checked before every poll and also bounds the poll
//! itself, so a response arriving after the deadline is never reported.

mod monitor;

pub use monitor::{AsyncOperationHandle, AsyncRequestMonitor};
