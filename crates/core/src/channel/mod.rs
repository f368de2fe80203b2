//! Transport channel
//!
//! Both flavors attach the endpoint's bearer credentials and recover from an
//! expired token by refreshing through the shared [`BearerSession`] and
//! retrying exactly once.
//!
//! [`BearerSession`]: crate::auth::BearerSession

pub mod https;
pub mod mqtt;
pub mod ports;

pub use https::TransportChannel;
pub use mqtt::{DeliveryMode, MqttChannel};
pub use ports::{
    ChannelRequest, ChannelResponse, HttpTransport, Method, PubSubError, PubSubResult,
    PubSubTransport, QoS,
};
