//! Delivery endpoints for outbound messages

use std::sync::Arc;

use async_trait::async_trait;
use cloudlink_domain::{CloudLinkError, Message};
use tracing::{debug, warn};

use crate::channel::{DeliveryMode, MqttChannel, TransportChannel};

/// Outcome of delivering one batch
///
/// The first `delivered` messages reached the service, the next `failed` were
/// attempted and did not, and anything after that was never attempted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub error: Option<CloudLinkError>,
}

impl DeliveryReport {
    pub fn success(count: usize) -> Self {
        Self { delivered: count, failed: 0, error: None }
    }

    pub fn failure(delivered: usize, failed: usize, error: CloudLinkError) -> Self {
        Self { delivered, failed, error: Some(error) }
    }

    pub fn is_complete(&self, batch_len: usize) -> bool {
        self.error.is_none() && self.delivered >= batch_len
    }
}

/// Single delivery endpoint the dispatcher drains into
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, batch: &[Message]) -> DeliveryReport;
}

/// POSTs the whole batch as one JSON array; all or nothing
pub struct HttpsDeliverySink {
    channel: Arc<TransportChannel>,
    path: String,
}

impl HttpsDeliverySink {
    pub fn new(channel: Arc<TransportChannel>, path: impl Into<String>) -> Self {
        Self { channel, path: path.into() }
    }
}

#[async_trait]
impl DeliverySink for HttpsDeliverySink {
    async fn deliver(&self, batch: &[Message]) -> DeliveryReport {
        if batch.is_empty() {
            return DeliveryReport::default();
        }
        match self.channel.post_json(&self.path, batch).await {
            Ok(response) => {
                debug!(count = batch.len(), status = response.status, "batch delivered");
                DeliveryReport::success(batch.len())
            }
            Err(error) => {
                warn!(count = batch.len(), error = %error, "batch delivery failed");
                DeliveryReport::failure(0, batch.len(), error)
            }
        }
    }
}

/// Publishes each message on one topic, stopping at the first failure
pub struct MqttDeliverySink {
    channel: Arc<MqttChannel>,
    topic: String,
}

impl MqttDeliverySink {
    pub fn new(channel: Arc<MqttChannel>, topic: impl Into<String>) -> Self {
        Self { channel, topic: topic.into() }
    }
}

#[async_trait]
impl DeliverySink for MqttDeliverySink {
    async fn deliver(&self, batch: &[Message]) -> DeliveryReport {
        for (index, message) in batch.iter().enumerate() {
            let mode = if message.is_guaranteed() {
                DeliveryMode::Acknowledged
            } else {
                DeliveryMode::FireAndForget
            };

            let outcome = match serde_json::to_vec(message) {
                Ok(payload) => self.channel.publish(&self.topic, &payload, mode).await,
                Err(e) => Err(CloudLinkError::Validation(format!("unserializable message: {e}"))),
            };

            if let Err(error) = outcome {
                warn!(message_id = %message.id, error = %error, "publish failed");
                return DeliveryReport::failure(index, 1, error);
            }
        }
        DeliveryReport::success(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use cloudlink_domain::Reliability;

    use super::*;
    use crate::auth::BearerSession;
    use crate::channel::{ChannelResponse, PubSubError, QoS};
    use crate::testing::{FakeCredentials, FakeHttp, FakePubSub};

    fn message(tag: i64) -> Message {
        Message::data("urn:test").with_source("d").with_item("tag", tag)
    }

    #[tokio::test]
    async fn https_sink_posts_array_to_path() {
        let http = FakeHttp::new();
        http.push(ChannelResponse::new(202, ""));
        let session = Arc::new(BearerSession::new(FakeCredentials::with_token("t")));
        let channel = Arc::new(TransportChannel::new(http.clone(), session, "d"));
        let sink = HttpsDeliverySink::new(channel, "/iot/api/v2/messages");

        let report = sink.deliver(&[message(1), message(2)]).await;

        assert_eq!(report, DeliveryReport::success(2));
        let sent = http.requests();
        assert_eq!(sent[0].path, "/iot/api/v2/messages");
        let body: serde_json::Value = serde_json::from_slice(sent[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn https_sink_fails_whole_batch() {
        let http = FakeHttp::new();
        http.push(ChannelResponse::new(503, "down"));
        let session = Arc::new(BearerSession::new(FakeCredentials::with_token("t")));
        let channel = Arc::new(TransportChannel::new(http, session, "d"));
        let sink = HttpsDeliverySink::new(channel, "/m");

        let report = sink.deliver(&[message(1), message(2), message(3)]).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 3);
        assert!(matches!(report.error, Some(CloudLinkError::Transport(_))));
    }

    #[tokio::test]
    async fn mqtt_sink_maps_reliability_and_stops_at_failure() {
        let broker = FakePubSub::new();
        broker.push_publish(Ok(()));
        broker.push_publish(Err(PubSubError::Failed("quota".into())));
        let session = Arc::new(BearerSession::new(FakeCredentials::with_token("t")));
        let channel = Arc::new(MqttChannel::new(broker.clone(), session, "d"));
        let sink = MqttDeliverySink::new(channel, "iotcs/messages");

        let batch = [
            message(1).with_reliability(Reliability::GuaranteedDelivery),
            message(2),
            message(3),
        ];
        let report = sink.deliver(&batch).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.is_complete(batch.len()));
        let published = broker.publishes();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "iotcs/messages");
        assert_eq!(published[0].2, QoS::AtLeastOnce);
        assert_eq!(published[1].2, QoS::AtMostOnce);
    }
}
