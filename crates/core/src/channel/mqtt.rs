//! Authenticated publish/subscribe channel

use std::sync::Arc;

use cloudlink_domain::{CloudLinkError, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::ports::{PubSubError, PubSubResult, PubSubTransport, QoS};
use crate::auth::BearerSession;

/// How a publish is acknowledged by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Hand off and move on (QoS 0)
    #[default]
    FireAndForget,
    /// Wait for the broker acknowledgment (QoS 1)
    Acknowledged,
}

impl DeliveryMode {
    pub fn qos(self) -> QoS {
        match self {
            Self::FireAndForget => QoS::AtMostOnce,
            Self::Acknowledged => QoS::AtLeastOnce,
        }
    }
}

/// MQTT channel that connects lazily with the bearer token as password
///
/// A dropped connection is re-established once per operation. A broker
/// rejection of the credentials refreshes the session token, reconnects and
/// retries once.
pub struct MqttChannel {
    transport: Arc<dyn PubSubTransport>,
    session: Arc<BearerSession>,
    client_id: String,
    connect_lock: tokio::sync::Mutex<()>,
    /// Token the live connection was opened with; `None` while disconnected.
    connected_with: Mutex<Option<String>>,
}

impl MqttChannel {
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        session: Arc<BearerSession>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session,
            client_id: client_id.into(),
            connect_lock: tokio::sync::Mutex::new(()),
            connected_with: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<BearerSession> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.connected_with.lock().is_some()
    }

    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    /// - `Auth` when the broker keeps rejecting the refreshed credentials
    /// - `Transport` when the connection cannot be re-established
    /// - `Rejected` when the broker refuses the publish itself
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn publish(&self, topic: &str, payload: &[u8], mode: DeliveryMode) -> Result<()> {
        let qos = mode.qos();
        self.with_reconnect("publish", || self.transport.publish(topic, payload, qos)).await
    }

    /// # Errors
    /// Same as [`MqttChannel::publish`].
    pub async fn subscribe(&self, topic: &str, mode: DeliveryMode) -> Result<()> {
        let qos = mode.qos();
        self.with_reconnect("subscribe", || self.transport.subscribe(topic, qos)).await
    }

    /// # Errors
    /// Same as [`MqttChannel::publish`].
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.with_reconnect("unsubscribe", || self.transport.unsubscribe(topic)).await
    }

    /// Close the broker connection. A later operation reconnects.
    ///
    /// # Errors
    /// Propagates the transport's close failure.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.connected_with.lock().take().is_none() {
            return Ok(());
        }
        info!(client_id = %self.client_id, "closing broker connection");
        self.transport.close().await.map_err(Into::into)
    }

    async fn with_reconnect<'a, F>(&'a self, op: &'static str, attempt: F) -> Result<()>
    where
        F: Fn() -> BoxFuture<'a, PubSubResult<()>>,
    {
        self.ensure_connected().await?;

        match attempt().await {
            Ok(()) => Ok(()),
            Err(PubSubError::Disconnected(reason)) => {
                warn!(op, %reason, "broker connection lost; reconnecting");
                self.mark_disconnected();
                self.ensure_connected().await?;
                attempt().await.map_err(Into::into)
            }
            Err(PubSubError::NotAuthorized(reason)) => {
                warn!(op, %reason, "broker rejected credentials; refreshing token");
                let stale = self.mark_disconnected();
                self.session.refresh(stale.as_deref()).await?;
                self.ensure_connected().await?;
                attempt().await.map_err(|e| auth_failure(op, e))
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.connected_with.lock().is_some() {
            return Ok(());
        }

        let token = self.session.token().await?;
        match self.transport.connect(&self.client_id, &token).await {
            Ok(()) => {
                debug!(client_id = %self.client_id, "broker connected");
                *self.connected_with.lock() = Some(token);
                Ok(())
            }
            Err(PubSubError::NotAuthorized(reason)) => {
                warn!(%reason, "broker refused connect; refreshing token");
                let fresh = self.session.refresh(Some(&token)).await?;
                self.transport
                    .connect(&self.client_id, &fresh)
                    .await
                    .map_err(|e| auth_failure("connect", e))?;
                debug!(client_id = %self.client_id, "broker connected after refresh");
                *self.connected_with.lock() = Some(fresh);
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn mark_disconnected(&self) -> Option<String> {
        self.connected_with.lock().take()
    }
}

fn auth_failure(op: &str, error: PubSubError) -> CloudLinkError {
    match error {
        PubSubError::NotAuthorized(reason) => {
            CloudLinkError::Auth(format!("{op} still unauthorized after token refresh: {reason}"))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCredentials, FakePubSub};

    fn channel(broker: &Arc<FakePubSub>, creds: &Arc<FakeCredentials>) -> MqttChannel {
        let session = Arc::new(BearerSession::new(creds.clone()));
        MqttChannel::new(broker.clone(), session, "device-1")
    }

    #[tokio::test]
    async fn connects_lazily_once() {
        let broker = FakePubSub::new();
        let creds = FakeCredentials::with_token("t0");
        let channel = channel(&broker, &creds);
        assert!(!channel.is_connected());

        channel.publish("a", b"1", DeliveryMode::Acknowledged).await.unwrap();
        channel.publish("a", b"2", DeliveryMode::FireAndForget).await.unwrap();

        assert!(channel.is_connected());
        assert_eq!(broker.connects(), vec![("device-1".to_string(), "t0".to_string())]);
        let published = broker.publishes();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].2, QoS::AtLeastOnce);
        assert_eq!(published[1].2, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn disconnect_reconnects_and_retries_once() {
        let broker = FakePubSub::new();
        broker.push_publish(Err(PubSubError::Disconnected("reset".into())));
        let creds = FakeCredentials::with_token("t0");
        let channel = channel(&broker, &creds);

        channel.publish("a", b"x", DeliveryMode::Acknowledged).await.unwrap();

        assert_eq!(broker.connects().len(), 2);
        assert_eq!(broker.publishes().len(), 2);
        assert_eq!(creds.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn not_authorized_refreshes_token_and_reconnects() {
        let broker = FakePubSub::new();
        broker.push_publish(Err(PubSubError::NotAuthorized("expired".into())));
        let creds = FakeCredentials::with_token("old");
        creds.push_refresh(Ok("new".into()));
        let channel = channel(&broker, &creds);

        channel.publish("a", b"x", DeliveryMode::Acknowledged).await.unwrap();

        assert_eq!(creds.refresh_calls(), 1);
        let connects = broker.connects();
        assert_eq!(connects.len(), 2);
        assert_eq!(connects[1].1, "new");
    }

    #[tokio::test]
    async fn repeated_rejection_is_an_auth_error() {
        let broker = FakePubSub::new();
        broker.push_publish(Err(PubSubError::NotAuthorized("expired".into())));
        broker.push_publish(Err(PubSubError::NotAuthorized("still expired".into())));
        let creds = FakeCredentials::with_token("old");
        let channel = channel(&broker, &creds);

        let result = channel.publish("a", b"x", DeliveryMode::Acknowledged).await;

        assert!(matches!(result, Err(CloudLinkError::Auth(_))));
        assert_eq!(broker.publishes().len(), 2);
        assert_eq!(creds.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn connect_refusal_refreshes_before_first_publish() {
        let broker = FakePubSub::new();
        broker.push_connect(Err(PubSubError::NotAuthorized("bad password".into())));
        let creds = FakeCredentials::with_token("old");
        creds.push_refresh(Ok("new".into()));
        let channel = channel(&broker, &creds);

        channel.subscribe("cmd", DeliveryMode::Acknowledged).await.unwrap();

        assert_eq!(creds.refresh_calls(), 1);
        assert_eq!(broker.subscriptions(), vec!["cmd".to_string()]);
    }

    #[tokio::test]
    async fn broker_refusal_is_rejected_without_retry() {
        let broker = FakePubSub::new();
        broker.push_publish(Err(PubSubError::Failed("topic denied".into())));
        let creds = FakeCredentials::with_token("t");
        let channel = channel(&broker, &creds);

        let result = channel.publish("a", b"x", DeliveryMode::FireAndForget).await;
        assert!(matches!(result, Err(CloudLinkError::Rejected(_))));
        assert_eq!(broker.publishes().len(), 1);
    }

    #[tokio::test]
    async fn close_then_reconnect_on_demand() {
        let broker = FakePubSub::new();
        let creds = FakeCredentials::with_token("t");
        let channel = channel(&broker, &creds);

        channel.close().await.unwrap();
        assert_eq!(broker.closes(), 0);

        channel.unsubscribe("cmd").await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_connected());
        assert_eq!(broker.closes(), 1);

        channel.publish("a", b"x", DeliveryMode::FireAndForget).await.unwrap();
        assert_eq!(broker.connects().len(), 2);
    }
}
