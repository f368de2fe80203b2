//! Configuration management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ASYNC_REQUEST_TIMEOUT_MS, DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MESSAGES_PATH,
    DEFAULT_MESSAGES_TOPIC, DEFAULT_POLLING_INTERVAL_MS, DEFAULT_REQUESTS_PATH,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_STORAGE_PATH,
};
use crate::errors::{CloudLinkError, Result};

/// Which side of the cloud service this endpoint plays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// A device or gateway: originates DATA/ALERT/RESPONSE messages
    #[default]
    Device,
    /// An enterprise application: originates REQUEST messages to devices
    Enterprise,
}

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub role: EndpointRole,
    pub server: ServerConfig,
    pub credentials: CredentialsConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub async_request: AsyncRequestConfig,
    pub mqtt: MqttConfig,
    pub logging: LoggingConfig,
}

/// Cloud service endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub endpoint_id: String,
    pub request_timeout_ms: u64,
    pub messages_path: String,
    pub requests_path: String,
    pub storage_path: String,
    /// Honour `HTTP(S)_PROXY` / `NO_PROXY` from the environment
    pub use_system_proxy: bool,
}

/// OAuth client-credentials configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub token_url: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub scope: Option<String>,
}

/// Message dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Library-wide scheduler cadence
    pub polling_interval_ms: u64,
    pub batch_size: usize,
    pub max_queue_size: usize,
    /// Bound on delivery attempts for guaranteed messages
    pub max_delivery_attempts: u32,
}

/// Storage dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub chunk_size: usize,
}

/// Async request monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncRequestConfig {
    pub timeout_ms: u64,
}

/// MQTT delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub messages_topic: String,
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoint_id: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            messages_path: DEFAULT_MESSAGES_PATH.to_string(),
            requests_path: DEFAULT_REQUESTS_PATH.to_string(),
            storage_path: DEFAULT_STORAGE_PATH.to_string(),
            use_system_proxy: true,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

impl Default for AsyncRequestConfig {
    fn default() -> Self {
        Self { timeout_ms: DEFAULT_ASYNC_REQUEST_TIMEOUT_MS }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { messages_topic: DEFAULT_MESSAGES_TOPIC.to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl DispatchConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

impl AsyncRequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ClientConfig {
    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |field: &str, reason: &str| -> Result<()> {
            Err(CloudLinkError::Config(format!("{field} {reason}")))
        };

        if self.server.base_url.trim().is_empty() {
            return fail("server.base_url", "must not be empty");
        }
        if self.server.endpoint_id.trim().is_empty() {
            return fail("server.endpoint_id", "must not be empty");
        }
        if self.dispatch.polling_interval_ms == 0 {
            return fail("dispatch.polling_interval_ms", "must be positive");
        }
        if self.dispatch.batch_size == 0 {
            return fail("dispatch.batch_size", "must be positive");
        }
        if self.dispatch.max_queue_size == 0 {
            return fail("dispatch.max_queue_size", "must be positive");
        }
        if self.dispatch.max_delivery_attempts == 0 {
            return fail("dispatch.max_delivery_attempts", "must be at least 1");
        }
        if self.storage.chunk_size == 0 {
            return fail("storage.chunk_size", "must be positive");
        }
        if self.async_request.timeout_ms == 0 {
            return fail("async_request.timeout_ms", "must be positive");
        }
        Ok(())
    }
}
