//! Client facade wiring every engine component for one endpoint

use std::sync::Arc;
use std::time::Duration;

use cloudlink_domain::{
    ClientConfig, CloudLinkError, EndpointRole, Message, Result, TransferEvent,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::async_request::{AsyncOperationHandle, AsyncRequestMonitor};
use crate::auth::{BearerSession, CredentialProvider};
use crate::channel::{HttpTransport, MqttChannel, PubSubTransport, TransportChannel};
use crate::dispatch::{
    DeliverySink, DeviceDispatcher, DispatchBase, DispatchCore, DispatchEvent, DispatchPolicy,
    Dispatcher, EnterpriseDispatcher, HttpsDeliverySink, MqttDeliverySink, TestConnectivity,
};
use crate::model::DeviceModelCache;
use crate::scheduler::Scheduler;
use crate::storage::{
    ChannelStorageTransport, StorageDispatcher, StorageTransport, TransferHandle,
    TransferRequest,
};

/// Builder for [`CloudClient`]
pub struct CloudClientBuilder {
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
    http: Option<Arc<dyn HttpTransport>>,
    pubsub: Option<Arc<dyn PubSubTransport>>,
    storage: Option<Arc<dyn StorageTransport>>,
    models: Option<Arc<DeviceModelCache>>,
}

impl CloudClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, credentials: None, http: None, pubsub: None, storage: None, models: None }
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn http(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    /// Deliver messages over MQTT instead of HTTPS.
    pub fn pubsub(mut self, transport: Arc<dyn PubSubTransport>) -> Self {
        self.pubsub = Some(transport);
        self
    }

    /// Override the HTTPS storage transport.
    pub fn storage(mut self, transport: Arc<dyn StorageTransport>) -> Self {
        self.storage = Some(transport);
        self
    }

    /// Share an existing device-model cache.
    pub fn models(mut self, models: Arc<DeviceModelCache>) -> Self {
        self.models = Some(models);
        self
    }

    /// # Errors
    /// Returns `CloudLinkError::Config` for an invalid configuration or a
    /// missing credential provider / HTTP transport.
    pub fn build(self) -> Result<CloudClient> {
        self.config.validate()?;
        let credentials = self
            .credentials
            .ok_or_else(|| CloudLinkError::Config("a credential provider is required".into()))?;
        let http =
            self.http.ok_or_else(|| CloudLinkError::Config("an HTTP transport is required".into()))?;

        let config = self.config;
        let endpoint_id = config.server.endpoint_id.clone();
        let scheduler = Scheduler::new(config.dispatch.polling_interval());
        let session = Arc::new(BearerSession::new(credentials));
        let channel =
            Arc::new(TransportChannel::new(http, Arc::clone(&session), endpoint_id.clone()));
        let models = self.models.unwrap_or_default();

        let mqtt = self.pubsub.map(|broker| {
            Arc::new(MqttChannel::new(broker, Arc::clone(&session), endpoint_id.clone()))
        });
        let sink: Arc<dyn DeliverySink> = match &mqtt {
            Some(mqtt) => {
                Arc::new(MqttDeliverySink::new(Arc::clone(mqtt), config.mqtt.messages_topic.clone()))
            }
            None => Arc::new(HttpsDeliverySink::new(
                Arc::clone(&channel),
                config.server.messages_path.clone(),
            )),
        };

        let (core, dispatch_events) = DispatchCore::new(
            sink,
            Arc::clone(&session),
            Arc::clone(&models),
            DispatchPolicy::from(&config.dispatch),
        );
        let base = DispatchBase::new(Arc::new(core), &scheduler);
        let dispatcher: Arc<dyn Dispatcher> = match config.role {
            EndpointRole::Device => Arc::new(DeviceDispatcher::new(base, endpoint_id.clone())),
            EndpointRole::Enterprise => {
                Arc::new(EnterpriseDispatcher::new(base, endpoint_id.clone()))
            }
        };

        let storage_transport: Arc<dyn StorageTransport> = match self.storage {
            Some(transport) => transport,
            None => Arc::new(ChannelStorageTransport::new(
                Arc::clone(&channel),
                config.server.storage_path.clone(),
            )),
        };
        let (storage, transfer_events) = StorageDispatcher::new(
            storage_transport,
            Arc::clone(&session),
            &scheduler,
            config.storage.chunk_size,
        );

        let async_requests = AsyncRequestMonitor::new(Arc::clone(&channel), scheduler.clone())
            .with_requests_path(config.server.requests_path.clone())
            .with_timeout(config.async_request.timeout());

        let connectivity = (config.role == EndpointRole::Device).then(|| {
            TestConnectivity::new(scheduler.clone(), Arc::clone(&dispatcher), endpoint_id.clone())
        });

        Ok(CloudClient {
            config,
            scheduler,
            session,
            channel,
            mqtt,
            models,
            dispatcher,
            storage,
            async_requests,
            connectivity,
            dispatch_events: Mutex::new(Some(dispatch_events)),
            transfer_events: Mutex::new(Some(transfer_events)),
        })
    }
}

/// One endpoint's connection to the cloud service
pub struct CloudClient {
    config: ClientConfig,
    scheduler: Scheduler,
    session: Arc<BearerSession>,
    channel: Arc<TransportChannel>,
    mqtt: Option<Arc<MqttChannel>>,
    models: Arc<DeviceModelCache>,
    dispatcher: Arc<dyn Dispatcher>,
    storage: StorageDispatcher,
    async_requests: AsyncRequestMonitor,
    connectivity: Option<TestConnectivity>,
    dispatch_events: Mutex<Option<mpsc::UnboundedReceiver<DispatchEvent>>>,
    transfer_events: Mutex<Option<mpsc::UnboundedReceiver<TransferEvent>>>,
}

impl CloudClient {
    pub fn builder(config: ClientConfig) -> CloudClientBuilder {
        CloudClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint_id(&self) -> &str {
        &self.config.server.endpoint_id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn session(&self) -> &Arc<BearerSession> {
        &self.session
    }

    pub fn channel(&self) -> &Arc<TransportChannel> {
        &self.channel
    }

    pub fn mqtt(&self) -> Option<&Arc<MqttChannel>> {
        self.mqtt.as_ref()
    }

    pub fn models(&self) -> &Arc<DeviceModelCache> {
        &self.models
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn storage(&self) -> &StorageDispatcher {
        &self.storage
    }

    /// Test-connectivity control surface; `None` for enterprise clients.
    pub fn connectivity(&self) -> Option<&TestConnectivity> {
        self.connectivity.as_ref()
    }

    /// # Errors
    /// See [`Dispatcher::queue`].
    pub fn send(&self, message: Message) -> Result<()> {
        self.dispatcher.queue(message)
    }

    /// # Errors
    /// See [`StorageDispatcher::queue`].
    pub fn transfer(&self, request: TransferRequest) -> Result<TransferHandle> {
        self.storage.queue(request)
    }

    pub fn track(&self, request_id: impl Into<String>) -> AsyncOperationHandle {
        self.async_requests.track(request_id)
    }

    /// Take the dispatch event stream. Only the first call gets it.
    pub fn take_dispatch_events(&self) -> Option<mpsc::UnboundedReceiver<DispatchEvent>> {
        self.dispatch_events.lock().take()
    }

    /// Take the transfer event stream. Only the first call gets it.
    pub fn take_transfer_events(&self) -> Option<mpsc::UnboundedReceiver<TransferEvent>> {
        self.transfer_events.lock().take()
    }

    /// Start every scheduler-driven component. Must run inside a tokio runtime.
    pub fn start(&self) {
        let dispatch = self.dispatcher.start();
        let storage = self.storage.start();
        if dispatch || storage {
            info!(endpoint_id = %self.endpoint_id(), role = ?self.config.role, "client started");
        }
    }

    /// Stop every scheduler-driven component. Idempotent.
    pub fn stop(&self) {
        if let Some(connectivity) = &self.connectivity {
            connectivity.stop();
        }
        let dispatch = self.dispatcher.stop();
        let storage = self.storage.stop();
        if dispatch || storage {
            info!(endpoint_id = %self.endpoint_id(), "client stopped");
        }
    }

    /// Stop, flush what is still queued, and close the broker connection.
    ///
    /// # Errors
    /// Propagates a failure to close the MQTT connection.
    pub async fn shutdown(&self, flush_timeout: Duration) -> Result<()> {
        self.stop();
        let flush = self.scheduler.exclusive(self.dispatcher.flush());
        if tokio::time::timeout(flush_timeout, flush).await.is_err() {
            warn!(pending = self.dispatcher.pending(), "final flush timed out");
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.close().await?;
        }
        Ok(())
    }
}
