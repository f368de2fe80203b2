//! Library constants
//!
//! Centralized defaults shared by the configuration structs and the engine.

// Scheduler
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1_000;

// Async request monitor
pub const DEFAULT_ASYNC_REQUEST_TIMEOUT_MS: u64 = 60_000;

// Message dispatcher
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

// Storage dispatcher
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// Server paths
pub const DEFAULT_MESSAGES_PATH: &str = "/iot/api/v2/messages";
pub const DEFAULT_REQUESTS_PATH: &str = "/iot/api/v2/requests";
pub const DEFAULT_STORAGE_PATH: &str = "/iot/api/v2/storage";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// MQTT
pub const DEFAULT_MESSAGES_TOPIC: &str = "iotcs/messages";

// Headers
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_ENDPOINT_ID: &str = "X-EndpointId";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_RANGE: &str = "Content-Range";
pub const HEADER_RANGE: &str = "Range";

// Diagnostics
pub const TEST_MESSAGE_FORMAT: &str = "urn:cloudlink:diagnostics:test_message";
/// Largest test-message payload, in characters
pub const MAX_TEST_MESSAGE_SIZE: usize = 64 * 1024;
