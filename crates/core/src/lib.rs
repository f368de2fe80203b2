//! # CloudLink Core
//!
//! Dispatch and synchronization engine - no infrastructure dependencies.
//!
//! This crate contains:
//! - The cooperative scheduler every periodic component runs on
//! - Bearer session with single-flight token refresh
//! - Transport channel (HTTPS and MQTT) with refresh-and-retry-once
//! - Message dispatch, storage transfers and async-request polling
//!
//! ## Architecture Principles
//! - Only depends on `cloudlink-common` and `cloudlink-domain`
//! - No HTTP client, broker client or token endpoint code
//! - All external dependencies via traits

pub mod async_request;
pub mod auth;
pub mod channel;
pub mod client;
pub mod dispatch;
pub mod model;
pub mod scheduler;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use async_request::{AsyncOperationHandle, AsyncRequestMonitor};
pub use auth::{BearerSession, CredentialProvider};
pub use channel::{
    ChannelRequest, ChannelResponse, DeliveryMode, HttpTransport, Method, MqttChannel,
    PubSubError, PubSubTransport, QoS, TransportChannel,
};
pub use client::{CloudClient, CloudClientBuilder};
pub use dispatch::{
    DeliveryReport, DeliverySink, DeviceDispatcher, DispatchEvent, DispatchPolicy, Dispatcher,
    EnterpriseDispatcher, FlushSummary, RoleDispatcher, TestConnectivity,
};
pub use model::{DeviceModelCache, FieldKind, FieldSpec};
pub use scheduler::{Monitor, Scheduler};
pub use storage::{
    ChannelStorageTransport, StorageDispatcher, StorageTransport, TransferHandle,
    TransferRequest, TransferStream,
};
