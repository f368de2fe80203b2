//! Long-running server operation types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CloudLinkError, Result};

/// State of an asynchronous server operation as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsyncStatus {
    Pending,
    Complete,
    Timeout,
    Error,
}

impl AsyncStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Body returned by the status endpoint of a long-running operation.
///
/// Both `status` and `complete` are mandatory; anything else the server sends
/// is kept verbatim in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: String,
    pub complete: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PollResponse {
    /// Parse a poll body.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Protocol` for empty bodies, invalid JSON, or
    /// a missing/mistyped `status` or `complete` field.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(CloudLinkError::Protocol("empty poll response".into()));
        }
        serde_json::from_slice(body)
            .map_err(|e| CloudLinkError::Protocol(format!("malformed poll response: {e}")))
    }
}

/// Terminal result of an async request monitor
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncOutcome {
    /// Server reported `complete = true`
    Complete(PollResponse),
    /// Deadline passed before completion
    Timeout,
    /// Poll failed or returned something unusable
    Error(CloudLinkError),
    /// Monitor was stopped by its owner
    Cancelled,
}

impl AsyncOutcome {
    pub fn status(&self) -> AsyncStatus {
        match self {
            Self::Complete(_) => AsyncStatus::Complete,
            Self::Timeout => AsyncStatus::Timeout,
            Self::Error(_) | Self::Cancelled => AsyncStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_response_and_keeps_extras() -> anyhow::Result<()> {
        let response = PollResponse::parse(br#"{"status":"DONE","complete":true,"result":7}"#)?;
        assert!(response.complete);
        assert_eq!(response.status, "DONE");
        assert_eq!(response.payload.get("result"), Some(&Value::from(7)));
        Ok(())
    }

    #[test]
    fn missing_fields_are_protocol_errors() {
        let bodies: [&[u8]; 6] = [
            b"",
            b"  ",
            b"{}",
            br#"{"status":"X"}"#,
            br#"{"complete":"yes","status":"X"}"#,
            b"nope",
        ];
        for body in bodies {
            assert!(
                matches!(PollResponse::parse(body), Err(CloudLinkError::Protocol(_))),
                "body {:?} should be rejected",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(AsyncOutcome::Timeout.status(), AsyncStatus::Timeout);
        assert!(AsyncStatus::Timeout.is_terminal());
        assert!(!AsyncStatus::Pending.is_terminal());
    }
}
