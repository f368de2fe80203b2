//! Queue plus reliability policy shared by every dispatcher variant

use std::sync::Arc;

use cloudlink_domain::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_MAX_QUEUE_SIZE,
};
use cloudlink_domain::{CloudLinkError, DispatchConfig, Message, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use super::queue::{OutboundQueue, QueueEntry};
use super::sink::DeliverySink;
use crate::auth::{require_activated, BearerSession};
use crate::model::DeviceModelCache;

/// Delivery outcome reported for every message that leaves the queue
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Delivered { message: Message },
    /// Dropped: best-effort failure, or guaranteed delivery out of attempts
    Failed { message: Message, error: CloudLinkError, attempts: u32 },
}

/// Tuning for [`DispatchCore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub max_attempts: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_queue_size: config.max_queue_size,
            max_attempts: config.max_delivery_attempts.max(1),
        }
    }
}

/// Counts for one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Endpoint not activated; nothing was attempted
    pub skipped: bool,
    pub delivered: usize,
    pub dropped: usize,
    pub requeued: usize,
}

pub struct DispatchCore {
    queue: Mutex<OutboundQueue>,
    sink: Arc<dyn DeliverySink>,
    session: Arc<BearerSession>,
    models: Arc<DeviceModelCache>,
    policy: DispatchPolicy,
    events: mpsc::UnboundedSender<DispatchEvent>,
    /// Held for a whole flush so batches from two flushes never interleave
    flight: tokio::sync::Mutex<()>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchCore {
    pub fn new(
        sink: Arc<dyn DeliverySink>,
        session: Arc<BearerSession>,
        models: Arc<DeviceModelCache>,
        policy: DispatchPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let core = Self {
            queue: Mutex::new(OutboundQueue::new(policy.max_queue_size)),
            sink,
            session,
            models,
            policy,
            events,
            flight: tokio::sync::Mutex::new(()),
            background: Mutex::new(None),
        };
        (core, receiver)
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Validate and enqueue. Never blocks on I/O.
    ///
    /// # Errors
    /// - `Validation` when the message shape or its data items are invalid
    /// - `Rejected` when the queue is full
    pub fn queue(&self, message: Message) -> Result<()> {
        message.validate()?;
        self.models.validate(&message)?;
        debug!(message_id = %message.id, priority = ?message.priority, "message queued");
        self.queue.lock().push(message)
    }

    /// Whether a background flush is still running
    pub fn is_flushing(&self) -> bool {
        self.background.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn a flush unless one started here is still running.
    ///
    /// Returns `false` when the previous background flush has not finished.
    pub fn flush_in_background(self: &Arc<Self>) -> bool {
        let mut background = self.background.lock();
        if background.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("previous flush still in flight");
            return false;
        }
        let core = Arc::clone(self);
        *background = Some(tokio::spawn(async move {
            core.flush().await;
        }));
        true
    }

    /// Drain the queue in priority order until it is empty or a delivery fails.
    ///
    /// Concurrent calls run one after another.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> FlushSummary {
        let _flight = self.flight.lock().await;
        let mut summary = FlushSummary::default();
        if let Err(reason) = require_activated(&self.session) {
            debug!(%reason, "flush skipped");
            summary.skipped = true;
            return summary;
        }

        loop {
            let batch = self.queue.lock().take(self.policy.batch_size);
            if batch.is_empty() {
                break;
            }

            let messages: Vec<Message> = batch.iter().map(|e| e.item.message.clone()).collect();
            let report = self.sink.deliver(&messages).await;

            let attempted = batch.len();
            let delivered = report.delivered.min(attempted);
            let failed = report.failed.min(attempted - delivered);
            let error = report.error.unwrap_or_else(|| {
                CloudLinkError::Internal("delivery failed without an error".into())
            });

            let mut entries = batch.into_iter();
            for entry in entries.by_ref().take(delivered) {
                self.emit(DispatchEvent::Delivered { message: entry.item.message });
                summary.delivered += 1;
            }
            for entry in entries.by_ref().take(failed) {
                if self.retry_or_drop(entry, &error) {
                    summary.requeued += 1;
                } else {
                    summary.dropped += 1;
                }
            }

            let untried: Vec<QueueEntry> = entries.collect();
            let stalled = delivered < attempted;
            if !untried.is_empty() {
                let mut queue = self.queue.lock();
                for entry in untried {
                    queue.restore(entry);
                }
            }

            if stalled {
                break;
            }
        }

        if summary != FlushSummary::default() {
            debug!(
                delivered = summary.delivered,
                dropped = summary.dropped,
                requeued = summary.requeued,
                "flush finished"
            );
        }
        summary
    }

    /// Returns `true` when the entry went back into the queue.
    fn retry_or_drop(&self, mut entry: QueueEntry, error: &CloudLinkError) -> bool {
        entry.item.attempts += 1;
        let attempts = entry.item.attempts;

        if entry.item.message.is_guaranteed() && attempts < self.policy.max_attempts {
            warn!(
                message_id = %entry.item.message.id,
                attempts,
                error = %error,
                "guaranteed delivery failed; will retry"
            );
            self.queue.lock().restore(entry);
            return true;
        }

        if entry.item.message.is_guaranteed() {
            error!(message_id = %entry.item.message.id, attempts, error = %error, "delivery attempts exhausted; dropping");
        } else {
            warn!(message_id = %entry.item.message.id, error = %error, "best-effort delivery failed; dropping");
        }
        self.emit(DispatchEvent::Failed { message: entry.item.message, error: error.clone(), attempts });
        false
    }

    fn emit(&self, event: DispatchEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }
}
