use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use cloudlink_domain::constants::{DEFAULT_ASYNC_REQUEST_TIMEOUT_MS, DEFAULT_REQUESTS_PATH};
use cloudlink_domain::{AsyncOutcome, AsyncStatus, CloudLinkError, PollResponse};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::TransportChannel;
use crate::scheduler::{Monitor, Scheduler};

/// Factory for [`AsyncOperationHandle`]s polling through one channel
pub struct AsyncRequestMonitor {
    channel: Arc<TransportChannel>,
    scheduler: Scheduler,
    requests_path: String,
    timeout: Duration,
}

impl AsyncRequestMonitor {
    pub fn new(channel: Arc<TransportChannel>, scheduler: Scheduler) -> Self {
        Self {
            channel,
            scheduler,
            requests_path: DEFAULT_REQUESTS_PATH.to_string(),
            timeout: Duration::from_millis(DEFAULT_ASYNC_REQUEST_TIMEOUT_MS),
        }
    }

    pub fn with_requests_path(mut self, path: impl Into<String>) -> Self {
        self.requests_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start polling `{requests_path}/{request_id}` on every scheduler tick.
    pub fn track(&self, request_id: impl Into<String>) -> AsyncOperationHandle {
        let request_id = request_id.into();
        let path = format!("{}/{}", self.requests_path.trim_end_matches('/'), request_id);
        let started = Instant::now();
        let (outcome, _) = watch::channel(None);
        let outcome = Arc::new(outcome);

        let poller = Poller {
            channel: Arc::clone(&self.channel),
            path,
            request_id: request_id.clone(),
            started,
            timeout: self.timeout,
            outcome: Arc::clone(&outcome),
            in_flight: Mutex::new(None),
        };
        let poller = Arc::new(poller);
        let ticking = Arc::clone(&poller);
        let monitor = self.scheduler.monitor(format!("async-request:{request_id}"), move || {
            futures::future::ready(ticking.tick())
        });
        monitor.start();
        info!(%request_id, timeout_ms = self.timeout.as_millis() as u64, "tracking async request");

        AsyncOperationHandle { request_id, started, timeout: self.timeout, outcome, monitor, poller }
    }
}

type OutcomeCell = Arc<watch::Sender<Option<AsyncOutcome>>>;

/// Record the terminal outcome; only the first one counts.
fn settle(cell: &watch::Sender<Option<AsyncOutcome>>, outcome: AsyncOutcome) -> bool {
    cell.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    })
}

struct Poller {
    channel: Arc<TransportChannel>,
    path: String,
    request_id: String,
    started: Instant,
    timeout: Duration,
    outcome: OutcomeCell,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Runs inside the scheduler's flow, so it never awaits the network:
    /// it starts one status poll at a time and reads back the settled outcome.
    fn tick(self: &Arc<Self>) -> ControlFlow<()> {
        if self.outcome.borrow().is_some() {
            return ControlFlow::Break(());
        }

        let elapsed = self.started.elapsed();
        if elapsed >= self.timeout {
            warn!(request_id = %self.request_id, "async request timed out");
            settle(&self.outcome, AsyncOutcome::Timeout);
            self.abort();
            return ControlFlow::Break(());
        }

        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            return ControlFlow::Continue(());
        }
        let remaining = self.timeout - elapsed;
        *in_flight = Some(tokio::spawn(Arc::clone(self).poll(remaining)));
        ControlFlow::Continue(())
    }

    async fn poll(self: Arc<Self>, remaining: Duration) {
        let outcome = match tokio::time::timeout(remaining, self.channel.get(&self.path)).await {
            Err(_) => {
                warn!(request_id = %self.request_id, "async request timed out mid-poll");
                AsyncOutcome::Timeout
            }
            Ok(Err(error)) => {
                warn!(request_id = %self.request_id, error = %error, "status poll failed");
                AsyncOutcome::Error(error)
            }
            Ok(Ok(response)) => match PollResponse::parse(&response.body) {
                Err(error) => AsyncOutcome::Error(error),
                Ok(poll) if poll.complete => AsyncOutcome::Complete(poll),
                Ok(poll) => {
                    debug!(request_id = %self.request_id, status = %poll.status, "still pending");
                    return;
                }
            },
        };

        if settle(&self.outcome, outcome) {
            debug!(request_id = %self.request_id, "async request settled");
        }
    }

    fn abort(&self) {
        if let Some(handle) = self.in_flight.lock().take() {
            handle.abort();
        }
    }
}

/// One long-running server operation being polled
pub struct AsyncOperationHandle {
    request_id: String,
    started: Instant,
    timeout: Duration,
    outcome: OutcomeCell,
    monitor: Monitor,
    poller: Arc<Poller>,
}

impl AsyncOperationHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status(&self) -> AsyncStatus {
        self.outcome.borrow().as_ref().map_or(AsyncStatus::Pending, AsyncOutcome::status)
    }

    pub fn outcome(&self) -> Option<AsyncOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&self) -> AsyncOutcome {
        let mut receiver = self.outcome.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone().unwrap_or(AsyncOutcome::Cancelled),
            // Sender lives in `self`; unreachable while borrowed.
            Err(_) => AsyncOutcome::Error(CloudLinkError::Internal("outcome channel closed".into())),
        };
        outcome
    }

    /// Stop polling. Settles as `Cancelled` unless already terminal.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        self.monitor.stop();
        self.poller.abort();
        if settle(&self.outcome, AsyncOutcome::Cancelled) {
            info!(request_id = %self.request_id, "async request tracking stopped");
        }
    }
}

impl std::fmt::Debug for AsyncOperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperationHandle")
            .field("request_id", &self.request_id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BearerSession;
    use crate::channel::ChannelResponse;
    use crate::testing::{FakeCredentials, FakeHttp};

    fn monitor(http: &Arc<FakeHttp>, timeout: Duration) -> AsyncRequestMonitor {
        let session = Arc::new(BearerSession::new(FakeCredentials::with_token("t")));
        let channel = Arc::new(TransportChannel::new(http.clone(), session, "d"));
        AsyncRequestMonitor::new(channel, Scheduler::new(Duration::from_millis(100)))
            .with_timeout(timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_once_when_server_reports_done() {
        let http = FakeHttp::new();
        http.push(ChannelResponse::new(200, r#"{"status":"RUNNING","complete":false}"#));
        http.push(ChannelResponse::new(200, r#"{"status":"DONE","complete":true,"result":42}"#));
        let handle = monitor(&http, Duration::from_secs(60)).track("req-1");
        assert_eq!(handle.status(), AsyncStatus::Pending);

        let outcome = handle.wait().await;

        let AsyncOutcome::Complete(poll) = outcome else { panic!("expected completion") };
        assert_eq!(poll.status, "DONE");
        assert_eq!(poll.payload["result"], 42);
        assert_eq!(handle.status(), AsyncStatus::Complete);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(http.requests().len(), 2);
        assert_eq!(http.requests()[0].path, "/iot/api/v2/requests/req-1");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_ignores_late_responses() {
        let http = FakeHttp::new();
        for _ in 0..10 {
            http.push(ChannelResponse::new(200, r#"{"status":"RUNNING","complete":false}"#));
        }
        let handle = monitor(&http, Duration::from_millis(350)).track("slow");

        assert_eq!(handle.wait().await, AsyncOutcome::Timeout);
        assert_eq!(handle.status(), AsyncStatus::Timeout);
        let polls = http.requests().len();
        assert_eq!(polls, 3);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(http.requests().len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_is_cut_off_at_deadline() {
        let http = FakeHttp::new();
        http.set_delay(Duration::from_secs(10));
        http.push(ChannelResponse::new(200, r#"{"status":"DONE","complete":true}"#));
        let handle = monitor(&http, Duration::from_millis(500)).track("hung");

        assert_eq!(handle.wait().await, AsyncOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_an_error() {
        let http = FakeHttp::new();
        http.push(ChannelResponse::new(200, r#"{"state":"??"}"#));
        let handle = monitor(&http, Duration::from_secs(60)).track("odd");

        assert!(matches!(handle.wait().await, AsyncOutcome::Error(CloudLinkError::Protocol(_))));
        assert_eq!(handle.status(), AsyncStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_an_error() {
        let http = FakeHttp::new();
        http.push(ChannelResponse::new(500, "boom"));
        let handle = monitor(&http, Duration::from_secs(60)).track("broken");

        assert!(matches!(handle.wait().await, AsyncOutcome::Error(CloudLinkError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let http = FakeHttp::new();
        let handle = monitor(&http, Duration::from_secs(60)).track("stopped");

        handle.stop();
        handle.stop();

        assert_eq!(handle.wait().await, AsyncOutcome::Cancelled);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(http.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_wakes_when_tracking_stops() {
        let http = FakeHttp::new();
        http.set_delay(Duration::from_secs(30));
        let handle = monitor(&http, Duration::from_secs(60)).track("parked");

        let mut waiter = tokio_test::task::spawn(handle.wait());
        tokio_test::assert_pending!(waiter.poll());

        handle.stop();
        assert!(waiter.is_woken());
        let outcome = tokio_test::assert_ready!(waiter.poll());
        assert_eq!(outcome, AsyncOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_leaves_the_flow_free_for_other_monitors() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let http = FakeHttp::new();
        http.set_delay(Duration::from_secs(50));
        let session = Arc::new(BearerSession::new(FakeCredentials::with_token("t")));
        let channel = Arc::new(TransportChannel::new(http.clone(), session, "d"));
        let scheduler = Scheduler::new(Duration::from_millis(100));
        let handle = AsyncRequestMonitor::new(channel, scheduler.clone()).track("slow");

        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let other = scheduler.monitor("other", move || {
            seen.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(ControlFlow::Continue(()))
        });
        other.start();

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert!(ticks.load(Ordering::SeqCst) >= 9);
        assert_eq!(http.requests().len(), 1, "one poll in flight at a time");
        assert_eq!(handle.status(), AsyncStatus::Pending);
        handle.stop();
        other.stop();
    }
}
