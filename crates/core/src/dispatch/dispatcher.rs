//! Device and enterprise dispatchers

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use cloudlink_domain::{CloudLinkError, Message, MessageType, Result};

use super::engine::{DispatchCore, FlushSummary};
use crate::scheduler::{Monitor, Scheduler};

/// Outbound message dispatcher
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Validate and enqueue without blocking.
    ///
    /// # Errors
    /// `Validation` for malformed messages, `Rejected` when the queue is full.
    fn queue(&self, message: Message) -> Result<()>;

    /// Deliver what is queued now, outside the scheduler cadence.
    async fn flush(&self) -> FlushSummary;

    fn pending(&self) -> usize;

    /// Begin periodic flushing. Returns `false` if already started.
    fn start(&self) -> bool;

    /// Stop periodic flushing. Returns `false` if already stopped.
    fn stop(&self) -> bool;
}

/// Queue, policy and flush monitor shared by both dispatcher variants
///
/// Each tick only spawns a flush; the network work runs outside the
/// scheduler's flow so other monitors keep ticking.
pub struct DispatchBase {
    core: Arc<DispatchCore>,
    monitor: Monitor,
}

impl DispatchBase {
    pub fn new(core: Arc<DispatchCore>, scheduler: &Scheduler) -> Self {
        let flushing = Arc::clone(&core);
        let monitor = scheduler.monitor("message-dispatch", move || {
            flushing.flush_in_background();
            futures::future::ready(ControlFlow::Continue(()))
        });
        Self { core, monitor }
    }

    pub fn core(&self) -> &Arc<DispatchCore> {
        &self.core
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub async fn flush(&self) -> FlushSummary {
        self.core.flush().await
    }

    pub fn pending(&self) -> usize {
        self.core.pending()
    }

    pub fn start(&self) -> bool {
        self.monitor.start()
    }

    pub fn stop(&self) -> bool {
        self.monitor.stop()
    }
}

/// Which messages an endpoint role may originate
pub trait Admission: Send + Sync {
    /// Check `message` against the role and stamp what the role owns.
    ///
    /// # Errors
    /// `Validation` when the role may not send this message.
    fn admit(&self, message: Message) -> Result<Message>;
}

fn stamp_source(mut message: Message, id: &str) -> Message {
    if message.source.trim().is_empty() {
        message.source = id.to_string();
    }
    message
}

/// Directly connected or gateway device
///
/// Devices send data, alerts and responses; they do not originate requests.
pub struct DeviceRole {
    endpoint_id: String,
}

impl Admission for DeviceRole {
    fn admit(&self, message: Message) -> Result<Message> {
        if message.message_type == MessageType::Request {
            return Err(CloudLinkError::Validation(format!(
                "device {} cannot originate REQUEST messages",
                self.endpoint_id
            )));
        }
        Ok(stamp_source(message, &self.endpoint_id))
    }
}

/// Enterprise application, which only sends requests addressed to devices
pub struct EnterpriseRole {
    application_id: String,
}

impl Admission for EnterpriseRole {
    fn admit(&self, message: Message) -> Result<Message> {
        if message.message_type != MessageType::Request {
            return Err(CloudLinkError::Validation(format!(
                "application {} can only send REQUEST messages, got {:?}",
                self.application_id, message.message_type
            )));
        }
        if message.destination.as_deref().map_or(true, |d| d.trim().is_empty()) {
            return Err(CloudLinkError::Validation("request destination is required".into()));
        }
        Ok(stamp_source(message, &self.application_id))
    }
}

/// A [`DispatchBase`] behind a role's admission rules
pub struct RoleDispatcher<A> {
    base: DispatchBase,
    role: A,
}

pub type DeviceDispatcher = RoleDispatcher<DeviceRole>;
pub type EnterpriseDispatcher = RoleDispatcher<EnterpriseRole>;

impl<A> RoleDispatcher<A> {
    pub fn base(&self) -> &DispatchBase {
        &self.base
    }
}

impl RoleDispatcher<DeviceRole> {
    pub fn new(base: DispatchBase, endpoint_id: impl Into<String>) -> Self {
        Self { base, role: DeviceRole { endpoint_id: endpoint_id.into() } }
    }
}

impl RoleDispatcher<EnterpriseRole> {
    pub fn new(base: DispatchBase, application_id: impl Into<String>) -> Self {
        Self { base, role: EnterpriseRole { application_id: application_id.into() } }
    }
}

#[async_trait]
impl<A: Admission> Dispatcher for RoleDispatcher<A> {
    fn queue(&self, message: Message) -> Result<()> {
        self.base.core.queue(self.role.admit(message)?)
    }

    async fn flush(&self) -> FlushSummary {
        self.base.flush().await
    }

    fn pending(&self) -> usize {
        self.base.pending()
    }

    fn start(&self) -> bool {
        self.base.start()
    }

    fn stop(&self) -> bool {
        self.base.stop()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::BearerSession;
    use crate::dispatch::engine::DispatchPolicy;
    use crate::model::DeviceModelCache;
    use crate::testing::{FakeCredentials, FakeSink};

    fn base(sink: &Arc<FakeSink>, scheduler: &Scheduler) -> DispatchBase {
        let session = Arc::new(BearerSession::new(FakeCredentials::with_token("t")));
        let (core, _events) = DispatchCore::new(
            sink.clone(),
            session,
            Arc::new(DeviceModelCache::new()),
            DispatchPolicy::default(),
        );
        DispatchBase::new(Arc::new(core), scheduler)
    }

    #[tokio::test]
    async fn device_stamps_source_and_refuses_requests() {
        let sink = FakeSink::new();
        let device = DeviceDispatcher::new(base(&sink, &Scheduler::default()), "dev-7");

        device.queue(Message::data("urn:test").with_item("x", 1)).unwrap();
        let request = Message::request("dev-9").with_source("dev-7");
        assert!(matches!(device.queue(request), Err(CloudLinkError::Validation(_))));

        device.flush().await;
        assert_eq!(sink.delivered()[0].source, "dev-7");
    }

    #[tokio::test]
    async fn enterprise_sends_only_addressed_requests() {
        let sink = FakeSink::new();
        let app = EnterpriseDispatcher::new(base(&sink, &Scheduler::default()), "app-1");

        assert!(app.queue(Message::data("urn:test").with_item("x", 1)).is_err());
        assert!(app.queue(Message::request("  ")).is_err());
        app.queue(Message::request("dev-1")).unwrap();

        assert_eq!(app.pending(), 1);
        app.flush().await;
        assert_eq!(sink.delivered()[0].source, "app-1");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_drives_flush() {
        let sink = FakeSink::new();
        let scheduler = Scheduler::new(Duration::from_millis(100));
        let device = DeviceDispatcher::new(base(&sink, &scheduler), "dev-1");
        device.queue(Message::data("urn:test").with_item("x", 1)).unwrap();

        assert!(device.start());
        assert!(!device.start());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(device.pending(), 0);
        assert_eq!(sink.delivered().len(), 1);
        assert!(device.stop());
        assert!(!device.stop());
        assert!(!device.base().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delivery_does_not_hold_up_other_monitors() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let sink = FakeSink::new();
        sink.set_delay(Duration::from_secs(50));
        let scheduler = Scheduler::new(Duration::from_millis(100));
        let device = DeviceDispatcher::new(base(&sink, &scheduler), "dev-1");
        device.queue(Message::data("urn:test").with_item("x", 1)).unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let other = scheduler.monitor("other", move || {
            seen.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(ControlFlow::Continue(()))
        });
        device.start();
        other.start();

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert!(device.base().core().is_flushing());
        assert_eq!(sink.calls(), 1);
        assert!(ticks.load(Ordering::SeqCst) >= 9);
        device.stop();
        other.stop();
    }
}
