//! In-memory fakes for every port, for unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudlink_domain::{CloudLinkError, Message, Result, StorageObject};
use parking_lot::Mutex;

use crate::auth::CredentialProvider;
use crate::channel::{
    ChannelRequest, ChannelResponse, HttpTransport, PubSubResult, PubSubTransport, QoS,
};
use crate::dispatch::{DeliveryReport, DeliverySink, Dispatcher, FlushSummary};
use crate::storage::StorageTransport;

/// Scripted credential provider
pub struct FakeCredentials {
    token: Mutex<Option<String>>,
    refreshes: Mutex<VecDeque<Result<String>>>,
    refresh_delay: Mutex<Duration>,
    activated: AtomicBool,
    token_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl FakeCredentials {
    fn build(token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token),
            refreshes: Mutex::new(VecDeque::new()),
            refresh_delay: Mutex::new(Duration::ZERO),
            activated: AtomicBool::new(true),
            token_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        })
    }

    pub fn with_token(token: &str) -> Arc<Self> {
        Self::build(Some(token.to_string()))
    }

    /// Activated, but holding no token until the first refresh.
    pub fn empty() -> Arc<Self> {
        Self::build(None)
    }

    /// Queue the result of the next refresh. Unscripted refreshes succeed
    /// with `refreshed-<n>`.
    pub fn push_refresh(&self, result: Result<String>) {
        self.refreshes.lock().push_back(result);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.store(activated, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn token(&self) -> Result<Option<String>> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.lock().clone())
    }

    async fn refresh(&self) -> Result<String> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result =
            self.refreshes.lock().pop_front().unwrap_or_else(|| Ok(format!("refreshed-{call}")));
        if let Ok(token) = &result {
            *self.token.lock() = Some(token.clone());
        }
        result
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }
}

/// Scripted HTTP transport; answers 200 with an empty body once the script
/// runs out
#[derive(Default)]
pub struct FakeHttp {
    script: Mutex<VecDeque<Result<ChannelResponse>>>,
    requests: Mutex<Vec<ChannelRequest>>,
    delay: Mutex<Duration>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: ChannelResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: CloudLinkError) {
        self.script.lock().push_back(Err(error));
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn execute(&self, request: &ChannelRequest) -> Result<ChannelResponse> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| Ok(ChannelResponse::new(200, "")))
    }
}

/// Scripted broker; operations succeed unless a failure was queued
#[derive(Default)]
pub struct FakePubSub {
    connect_script: Mutex<VecDeque<PubSubResult<()>>>,
    publish_script: Mutex<VecDeque<PubSubResult<()>>>,
    connects: Mutex<Vec<(String, String)>>,
    publishes: Mutex<Vec<(String, Vec<u8>, QoS)>>,
    subscriptions: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl FakePubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_connect(&self, result: PubSubResult<()>) {
        self.connect_script.lock().push_back(result);
    }

    pub fn push_publish(&self, result: PubSubResult<()>) {
        self.publish_script.lock().push_back(result);
    }

    /// Every connect attempt as `(client_id, password)`
    pub fn connects(&self) -> Vec<(String, String)> {
        self.connects.lock().clone()
    }

    /// Every publish attempt, successful or not
    pub fn publishes(&self) -> Vec<(String, Vec<u8>, QoS)> {
        self.publishes.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PubSubTransport for FakePubSub {
    async fn connect(&self, client_id: &str, password: &str) -> PubSubResult<()> {
        self.connects.lock().push((client_id.to_string(), password.to_string()));
        self.connect_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> PubSubResult<()> {
        self.publishes.lock().push((topic.to_string(), payload.to_vec(), qos));
        self.publish_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> PubSubResult<()> {
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> PubSubResult<()> {
        self.subscriptions.lock().retain(|t| t != topic);
        Ok(())
    }

    async fn close(&self) -> PubSubResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out `token-0` first and `token-<n>` after the n-th refresh
#[derive(Default)]
pub struct RotatingCredentials {
    refreshes: AtomicUsize,
}

impl RotatingCredentials {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> String {
        format!("token-{}", self.refreshes())
    }
}

#[async_trait]
impl CredentialProvider for RotatingCredentials {
    async fn token(&self) -> Result<Option<String>> {
        Ok(Some(self.current()))
    }

    async fn refresh(&self) -> Result<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }

    fn is_activated(&self) -> bool {
        true
    }
}

type Route = Box<dyn Fn(&ChannelRequest) -> Option<ChannelResponse> + Send + Sync>;

/// HTTP transport answering from a list of routes; first match wins,
/// anything unmatched gets 404
#[derive(Default)]
pub struct RoutedHttp {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ChannelRequest>>,
}

impl RoutedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route<F>(&self, handler: F)
    where
        F: Fn(&ChannelRequest) -> Option<ChannelResponse> + Send + Sync + 'static,
    {
        self.routes.lock().push(Box::new(handler));
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ChannelRequest> {
        self.requests().into_iter().filter(|r| r.path.starts_with(path)).collect()
    }
}

#[async_trait]
impl HttpTransport for RoutedHttp {
    async fn execute(&self, request: &ChannelRequest) -> Result<ChannelResponse> {
        self.requests.lock().push(request.clone());
        let routes = self.routes.lock();
        let response = routes
            .iter()
            .find_map(|route| route(request))
            .unwrap_or_else(|| ChannelResponse::new(404, "no route"));
        Ok(response)
    }
}

/// Scripted delivery sink; unscripted batches are fully delivered
#[derive(Default)]
pub struct FakeSink {
    script: Mutex<VecDeque<DeliveryReport>>,
    attempted: Mutex<Vec<Message>>,
    delivered: Mutex<Vec<Message>>,
    batch_sizes: Mutex<Vec<usize>>,
    delay: Mutex<Duration>,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay every delivery by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn push(&self, report: DeliveryReport) {
        self.script.lock().push_back(report);
    }

    pub fn calls(&self) -> usize {
        self.batch_sizes.lock().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Messages handed to the sink that were attempted (delivered or failed)
    pub fn attempted(&self) -> Vec<Message> {
        self.attempted.lock().clone()
    }

    pub fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl DeliverySink for FakeSink {
    async fn deliver(&self, batch: &[Message]) -> DeliveryReport {
        self.batch_sizes.lock().push(batch.len());
        let report =
            self.script.lock().pop_front().unwrap_or_else(|| DeliveryReport::success(batch.len()));
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let delivered = report.delivered.min(batch.len());
        let attempted = (delivered + report.failed).min(batch.len());
        self.delivered.lock().extend_from_slice(&batch[..delivered]);
        self.attempted.lock().extend_from_slice(&batch[..attempted]);
        report
    }
}

/// In-memory object store
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<VecDeque<CloudLinkError>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, uri: &str, data: &[u8]) {
        self.objects.lock().insert(uri.to_string(), data.to_vec());
    }

    pub fn object(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(uri).cloned()
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: CloudLinkError) {
        self.failures.lock().push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever observed running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageTransport for FakeStorage {
    async fn allocate(&self, object: &StorageObject) -> Result<String> {
        self.enter().await?;
        let mut objects = self.objects.lock();
        let uri = format!("/objects/{}/{}", objects.len() + 1, object.name);
        objects.insert(uri.clone(), Vec::new());
        Ok(uri)
    }

    async fn put_chunk(
        &self,
        uri: &str,
        offset: u64,
        chunk: &[u8],
        _total: Option<u64>,
    ) -> Result<()> {
        self.enter().await?;
        let mut objects = self.objects.lock();
        let data = objects.entry(uri.to_string()).or_default();
        let offset = offset as usize;
        if data.len() < offset + chunk.len() {
            data.resize(offset + chunk.len(), 0);
        }
        data[offset..offset + chunk.len()].copy_from_slice(chunk);
        Ok(())
    }

    async fn get_chunk(&self, uri: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.enter().await?;
        let objects = self.objects.lock();
        let data = objects
            .get(uri)
            .ok_or_else(|| CloudLinkError::Rejected(format!("no such object {uri}")))?;
        let start = (offset as usize).min(data.len());
        let end = (start + len).min(data.len());
        Ok(data[start..end].to_vec())
    }
}

/// Dispatcher that only records what it was asked to queue
#[derive(Default)]
pub struct RecordingDispatcher {
    queued: Mutex<Vec<Message>>,
    running: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queued(&self) -> Vec<Message> {
        self.queued.lock().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    fn queue(&self, message: Message) -> Result<()> {
        message.validate()?;
        self.queued.lock().push(message);
        Ok(())
    }

    async fn flush(&self) -> FlushSummary {
        FlushSummary::default()
    }

    fn pending(&self) -> usize {
        self.queued.lock().len()
    }

    fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }
}
