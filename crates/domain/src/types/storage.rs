//! Storage object transfer types

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CloudLinkError, Result};

/// Metadata of a storage object
///
/// `uri` stays `None` until the service allocates the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl StorageObject {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            uri: None,
            name: name.into(),
            mime_type: mime_type.into(),
            encoding: None,
            length: None,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// # Errors
    /// Returns `CloudLinkError::Validation` when name or type is blank.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CloudLinkError::Validation("storage object name is required".into()));
        }
        if self.mime_type.trim().is_empty() {
            return Err(CloudLinkError::Validation(format!(
                "storage object '{}' has no content type",
                self.name
            )));
        }
        Ok(())
    }
}

/// Direction of a transfer relative to this endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressState {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Transitions only move forward; cancellation is reachable only from
    /// `Queued` or `InProgress`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProgressState::{Cancelled, Completed, Failed, InProgress, Queued};
        matches!(
            (self, next),
            (Queued, InProgress)
                | (Queued, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Queued,
            1 => Self::InProgress,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

/// Progress or completion report for one transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub transfer_id: Uuid,
    pub name: String,
    pub direction: TransferDirection,
    pub state: ProgressState,
    pub bytes_transferred: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CloudLinkError>,
    /// Set on `Failed` when re-queuing the same transfer may succeed
    #[serde(default)]
    pub retryable: bool,
}

/// Lock-free cell holding a [`ProgressState`]
#[derive(Debug)]
pub struct AtomicProgressState(AtomicU8);

impl AtomicProgressState {
    pub fn new(state: ProgressState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> ProgressState {
        ProgressState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if the transition is legal from the current state.
    /// Returns the state actually observed before the attempt.
    pub fn transition(
        &self,
        next: ProgressState,
    ) -> std::result::Result<ProgressState, ProgressState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let state = ProgressState::from_u8(current);
            if !state.can_transition_to(next) {
                return Err(state);
            }
            match self.0.compare_exchange(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(state),
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        use ProgressState::*;
        assert!(Queued.can_transition_to(InProgress));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
    }

    #[test]
    fn atomic_state_rejects_illegal_moves() {
        let state = AtomicProgressState::new(ProgressState::Queued);
        assert_eq!(state.transition(ProgressState::InProgress), Ok(ProgressState::Queued));
        assert_eq!(state.transition(ProgressState::Cancelled), Ok(ProgressState::InProgress));
        assert_eq!(state.transition(ProgressState::Completed), Err(ProgressState::Cancelled));
        assert_eq!(state.load(), ProgressState::Cancelled);
    }

    #[test]
    fn metadata_wire_names() -> anyhow::Result<()> {
        let object = StorageObject::new("photo.jpg", "image/jpeg").with_length(42);
        let json = serde_json::to_value(&object)?;
        assert_eq!(json["type"], "image/jpeg");
        assert_eq!(json["length"], 42);
        assert!(json.get("uri").is_none());
        assert!(object.validate().is_ok());
        assert!(StorageObject::new("", "x").validate().is_err());
        Ok(())
    }
}
