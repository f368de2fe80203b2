//! Port interfaces for the underlying transports

use async_trait::async_trait;
use cloudlink_domain::{CloudLinkError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// HTTP method subset used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Request handed to an [`HttpTransport`]
///
/// `path` is either relative to the configured base URL or absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ChannelRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// Add a header, replacing any existing header of the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = Some(body);
        self.with_header("Content-Type", content_type)
    }

    /// Serialize `value` as the JSON body.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Validation` if `value` cannot be serialized.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| CloudLinkError::Validation(format!("unserializable body: {e}")))?;
        Ok(self.with_body(body, "application/json"))
    }
}

/// Response returned by an [`HttpTransport`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ChannelResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Map non-2xx statuses onto the error taxonomy.
    ///
    /// # Errors
    /// See [`CloudLinkError::from_status`].
    pub fn into_result(self) -> Result<Self> {
        match CloudLinkError::from_status(self.status, &String::from_utf8_lossy(&self.body)) {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    /// # Errors
    /// Returns `CloudLinkError::Protocol` when the body is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| CloudLinkError::Protocol(format!("unexpected response body: {e}")))
    }
}

/// Request/response primitive (HTTPS)
///
/// Implementations return `Ok` for every HTTP status, including 4xx and 5xx;
/// `Err` is reserved for failures to obtain a response at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ChannelRequest) -> Result<ChannelResponse>;
}

/// MQTT quality of service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// QoS 0: fire-and-forget
    AtMostOnce,
    /// QoS 1: wait for broker acknowledgment
    AtLeastOnce,
}

/// Failure reported by a publish/subscribe transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    #[error("broker connection lost: {0}")]
    Disconnected(String),

    #[error("broker rejected credentials: {0}")]
    NotAuthorized(String),

    #[error("broker operation failed: {0}")]
    Failed(String),
}

impl From<PubSubError> for CloudLinkError {
    fn from(error: PubSubError) -> Self {
        match error {
            PubSubError::Disconnected(_) => Self::Transport(error.to_string()),
            PubSubError::NotAuthorized(_) => Self::Auth(error.to_string()),
            PubSubError::Failed(_) => Self::Rejected(error.to_string()),
        }
    }
}

pub type PubSubResult<T> = std::result::Result<T, PubSubError>;

/// Publish/subscribe primitive (MQTT)
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn connect(&self, client_id: &str, password: &str) -> PubSubResult<()>;

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> PubSubResult<()>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> PubSubResult<()>;

    async fn unsubscribe(&self, topic: &str) -> PubSubResult<()>;

    async fn close(&self) -> PubSubResult<()>;
}
