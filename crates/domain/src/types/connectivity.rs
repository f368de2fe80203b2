//! Test-connectivity control surface
//!
//! The diagnostics flow is driven through an HTTP-style resource: `GET`
//! reads its status, `PUT` starts or stops it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;
pub const STATUS_CONFLICT: u16 = 409;

/// Body of a `PUT` to the test-connectivity resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityCommand {
    pub active: bool,
    /// Milliseconds between generated messages
    #[serde(default)]
    pub interval: Option<i64>,
    /// Payload length in characters
    #[serde(default)]
    pub size: Option<i64>,
    /// Number of messages to generate
    #[serde(default)]
    pub count: Option<i64>,
}

/// Current state of the diagnostics flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityStatus {
    pub active: bool,
    pub interval: u64,
    pub size: u64,
    pub count: u64,
    pub current_count: u64,
}

/// HTTP-style reply from the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: u16,
    pub body: Value,
}

impl ControlResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: STATUS_OK, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self { status, body: serde_json::json!({ "error": message.into() }) }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}
