//! Observability bootstrap
//!
//! The engine only emits `tracing` events; this module installs the
//! subscriber that turns them into log lines.

mod logging;

pub use logging::{build_filter, init_tracing};
