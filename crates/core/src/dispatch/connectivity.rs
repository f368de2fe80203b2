//! Diagnostic test-connectivity flow
//!
//! Generates synthetic DATA messages through a [`Dispatcher`] at a fixed
//! interval until a target count is reached.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use cloudlink_domain::constants::{MAX_TEST_MESSAGE_SIZE, TEST_MESSAGE_FORMAT};
use cloudlink_domain::types::connectivity::{
    STATUS_BAD_REQUEST, STATUS_CONFLICT, STATUS_METHOD_NOT_ALLOWED,
};
use cloudlink_domain::{
    ConnectivityCommand, ConnectivityStatus, ControlResponse, Message, Priority, Reliability,
};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::dispatcher::Dispatcher;
use crate::channel::Method;
use crate::scheduler::{Monitor, Scheduler};

#[derive(Default)]
struct Run {
    status: ConnectivityStatus,
    monitor: Option<Monitor>,
}

pub struct TestConnectivity {
    scheduler: Scheduler,
    dispatcher: Arc<dyn Dispatcher>,
    endpoint_id: String,
    run: Arc<Mutex<Run>>,
}

impl TestConnectivity {
    pub fn new(
        scheduler: Scheduler,
        dispatcher: Arc<dyn Dispatcher>,
        endpoint_id: impl Into<String>,
    ) -> Self {
        Self { scheduler, dispatcher, endpoint_id: endpoint_id.into(), run: Arc::default() }
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.run.lock().status.clone()
    }

    pub fn is_active(&self) -> bool {
        self.run.lock().status.active
    }

    /// Serve the control resource: `GET` reads status, `PUT` starts or stops.
    pub fn handle(&self, method: Method, body: &[u8]) -> ControlResponse {
        match method {
            Method::Get => ControlResponse::ok(self.status_body()),
            Method::Put => match serde_json::from_slice::<ConnectivityCommand>(body) {
                Ok(command) if command.active => self.start(&command),
                Ok(_) => {
                    self.stop();
                    ControlResponse::ok(self.status_body())
                }
                Err(e) => ControlResponse::error(STATUS_BAD_REQUEST, format!("invalid body: {e}")),
            },
            other => ControlResponse::error(
                STATUS_METHOD_NOT_ALLOWED,
                format!("{} not allowed", other.as_str()),
            ),
        }
    }

    /// Start generating messages.
    pub fn start(&self, command: &ConnectivityCommand) -> ControlResponse {
        let (interval, size, count) = match (command.interval, command.size, command.count) {
            (Some(interval), Some(size), Some(count)) if interval > 0 && size >= 0 && count > 0 => {
                (interval as u64, size as u64, count as u64)
            }
            _ => {
                return ControlResponse::error(
                    STATUS_BAD_REQUEST,
                    "interval and count must be positive and size non-negative",
                )
            }
        };
        if usize::try_from(size).map_or(true, |size| size > MAX_TEST_MESSAGE_SIZE) {
            return ControlResponse::error(
                STATUS_BAD_REQUEST,
                format!("size must not exceed {MAX_TEST_MESSAGE_SIZE}"),
            );
        }

        let mut run = self.run.lock();
        if run.status.active {
            return ControlResponse::error(STATUS_CONFLICT, "test connectivity already running");
        }

        run.status = ConnectivityStatus { active: true, interval, size, count, current_count: 0 };
        let monitor = self.scheduler.monitor_every(
            "test-connectivity",
            Duration::from_millis(interval),
            self.generator(),
        );
        monitor.start();
        run.monitor = Some(monitor);
        info!(interval, size, count, "test connectivity started");

        ControlResponse::ok(serde_json::to_value(&run.status).unwrap_or_default())
    }

    /// Stop generating messages. Idempotent.
    pub fn stop(&self) {
        let mut run = self.run.lock();
        if let Some(monitor) = run.monitor.take() {
            monitor.stop();
        }
        if run.status.active {
            run.status.active = false;
            info!(sent = run.status.current_count, "test connectivity stopped");
        }
    }

    fn status_body(&self) -> serde_json::Value {
        serde_json::to_value(self.status()).unwrap_or_default()
    }

    fn generator(
        &self,
    ) -> impl Fn() -> futures::future::Ready<ControlFlow<()>> + Send + Sync + 'static {
        let run = Arc::clone(&self.run);
        let dispatcher = Arc::clone(&self.dispatcher);
        let source = self.endpoint_id.clone();

        move || {
            let mut state = run.lock();
            if !state.status.active {
                return futures::future::ready(ControlFlow::Break(()));
            }

            state.status.current_count += 1;
            let size = usize::try_from(state.status.size).unwrap_or(0).min(MAX_TEST_MESSAGE_SIZE);
            let message = Message::data(TEST_MESSAGE_FORMAT)
                .with_source(source.clone())
                .with_priority(Priority::Highest)
                .with_reliability(Reliability::BestEffort)
                .with_item("count", state.status.current_count)
                .with_item("payload", "*".repeat(size));
            if let Err(error) = dispatcher.queue(message) {
                warn!(error = %error, "test message not queued");
            }

            if state.status.current_count >= state.status.count {
                state.status.active = false;
                info!(count = state.status.count, "test connectivity finished");
                return futures::future::ready(ControlFlow::Break(()));
            }
            futures::future::ready(ControlFlow::Continue(()))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::RecordingDispatcher;

    fn put(body: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&body).unwrap()
    }

    fn flow(dispatcher: &Arc<RecordingDispatcher>) -> TestConnectivity {
        TestConnectivity::new(Scheduler::default(), dispatcher.clone(), "dev-1")
    }

    #[tokio::test(start_paused = true)]
    async fn produces_count_messages_then_stops() {
        let dispatcher = RecordingDispatcher::new();
        let flow = flow(&dispatcher);

        let response =
            flow.handle(Method::Put, &put(json!({"active": true, "interval": 500, "size": 10, "count": 3})));
        assert_eq!(response.status, 200);

        tokio::time::sleep(Duration::from_millis(5_000)).await;

        let queued = dispatcher.queued();
        assert_eq!(queued.len(), 3);
        assert!(!flow.is_active());
        assert_eq!(flow.status().current_count, 3);

        let last = &queued[2];
        assert_eq!(last.format.as_deref(), Some(TEST_MESSAGE_FORMAT));
        assert_eq!(last.priority, Priority::Highest);
        assert_eq!(last.data_items.get("count"), Some(&json!(3)));
        assert_eq!(last.data_items.get("payload").and_then(|p| p.as_str()).map(str::len), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_start_is_rejected() {
        let dispatcher = RecordingDispatcher::new();
        let flow = flow(&dispatcher);
        let body = put(json!({"active": true, "interval": 500, "size": 10, "count": 3}));

        assert_eq!(flow.handle(Method::Put, &body).status, 200);
        assert_eq!(flow.handle(Method::Put, &body).status, STATUS_CONFLICT);
        flow.stop();
    }

    #[tokio::test]
    async fn malformed_parameters_are_bad_requests() {
        let dispatcher = RecordingDispatcher::new();
        let flow = flow(&dispatcher);

        for body in [
            json!({"active": true, "interval": 500, "size": -1, "count": 3}),
            json!({"active": true, "interval": 0, "size": 1, "count": 3}),
            json!({"active": true, "interval": 500, "size": 1, "count": 0}),
            json!({"active": true, "size": 1, "count": 3}),
        ] {
            assert_eq!(flow.handle(Method::Put, &put(body)).status, STATUS_BAD_REQUEST);
        }
        assert_eq!(flow.handle(Method::Put, b"not json").status, STATUS_BAD_REQUEST);
        assert!(!flow.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_payload_is_a_bad_request() {
        let dispatcher = RecordingDispatcher::new();
        let flow = flow(&dispatcher);

        for size in [i64::MAX, MAX_TEST_MESSAGE_SIZE as i64 + 1] {
            let body = put(json!({"active": true, "interval": 100, "size": size, "count": 1}));
            assert_eq!(flow.handle(Method::Put, &body).status, STATUS_BAD_REQUEST);
        }
        assert!(!flow.is_active());

        let largest = put(json!({
            "active": true, "interval": 100, "size": MAX_TEST_MESSAGE_SIZE, "count": 1
        }));
        assert_eq!(flow.handle(Method::Put, &largest).status, 200);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let queued = dispatcher.queued();
        assert_eq!(queued.len(), 1);
        let payload = queued[0].data_items.get("payload").and_then(|p| p.as_str()).map(str::len);
        assert_eq!(payload, Some(MAX_TEST_MESSAGE_SIZE));
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let dispatcher = RecordingDispatcher::new();
        let flow = flow(&dispatcher);
        assert_eq!(flow.handle(Method::Post, b"{}").status, STATUS_METHOD_NOT_ALLOWED);
        assert_eq!(flow.handle(Method::Delete, b"").status, STATUS_METHOD_NOT_ALLOWED);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_generation_and_is_idempotent() {
        let dispatcher = RecordingDispatcher::new();
        let flow = flow(&dispatcher);
        flow.handle(Method::Put, &put(json!({"active": true, "interval": 100, "size": 0, "count": 50})));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let stop = flow.handle(Method::Put, &put(json!({"active": false})));
        assert_eq!(stop.status, 200);
        assert_eq!(stop.body["active"], false);
        let sent = dispatcher.queued().len();
        assert_eq!(sent, 2);

        flow.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dispatcher.queued().len(), sent);

        let status = flow.handle(Method::Get, b"");
        assert_eq!(status.body["currentCount"], 2);
    }
}
