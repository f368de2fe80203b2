//! Error types used throughout the runtime

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed message or request, rejected before queuing
    Validation,
    /// 401-class failure that survived a refresh-and-retry
    Auth,
    /// Network or server-side failure, retryable per dispatcher policy
    Transport,
    /// Elapsed time exceeded a per-operation limit
    Timeout,
    /// Server response could not be understood
    Protocol,
    /// Operation already running
    Conflict,
    /// Server refused the operation outright
    Rejected,
    /// Invalid or missing configuration
    Config,
    /// Operation cancelled by its owner
    Cancelled,
    /// Invariant violation inside the runtime
    Internal,
}

/// Main error type for CloudLink
///
/// `Clone` so that a single refresh failure can be handed to every caller
/// waiting on it, and serializable so in-flight failures can travel over event
/// channels unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CloudLinkError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CloudLinkError {
    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Rejected(_) => ErrorCategory::Rejected,
            Self::Config(_) => ErrorCategory::Config,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether re-issuing the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Stable label suitable for structured log fields
    pub fn label(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::Config => "config",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Map a non-success HTTP status to the error taxonomy.
    ///
    /// 401 is an auth failure, 408/429/5xx are transient transport failures,
    /// every other 4xx is a rejection. `None` for 2xx.
    pub fn from_status(status: u16, body: &str) -> Option<Self> {
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 256))
        };

        match status {
            200..=299 => None,
            401 => Some(Self::Auth(detail)),
            408 | 429 | 500..=599 => Some(Self::Transport(detail)),
            400..=499 => Some(Self::Rejected(detail)),
            _ => Some(Self::Protocol(detail)),
        }
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

/// Result type alias for CloudLink operations
pub type Result<T> = std::result::Result<T, CloudLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(CloudLinkError::Transport("reset".into()).is_retryable());
        assert!(CloudLinkError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!CloudLinkError::Rejected("quota".into()).is_retryable());
        assert!(!CloudLinkError::Auth("expired".into()).is_retryable());
        assert!(!CloudLinkError::Protocol("garbage".into()).is_retryable());
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(CloudLinkError::from_status(204, ""), None);
        assert!(matches!(CloudLinkError::from_status(401, ""), Some(CloudLinkError::Auth(_))));
        assert!(matches!(
            CloudLinkError::from_status(503, "busy"),
            Some(CloudLinkError::Transport(msg)) if msg.contains("busy")
        ));
        assert!(matches!(
            CloudLinkError::from_status(429, ""),
            Some(CloudLinkError::Transport(_))
        ));
        assert!(matches!(
            CloudLinkError::from_status(413, ""),
            Some(CloudLinkError::Rejected(_))
        ));
        assert!(matches!(
            CloudLinkError::from_status(302, ""),
            Some(CloudLinkError::Protocol(_))
        ));
    }

    #[test]
    fn serializes_with_type_tag() -> anyhow::Result<()> {
        let json = serde_json::to_value(CloudLinkError::Conflict("running".into()))?;
        assert_eq!(json["type"], "Conflict");
        assert_eq!(json["message"], "running");

        let back: CloudLinkError = serde_json::from_value(json)?;
        assert_eq!(back.category(), ErrorCategory::Conflict);
        assert_eq!(back.label(), "conflict");
        Ok(())
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let Some(CloudLinkError::Rejected(msg)) = CloudLinkError::from_status(400, &body) else {
            panic!("expected rejection");
        };
        assert!(msg.len() < 300);
    }
}
