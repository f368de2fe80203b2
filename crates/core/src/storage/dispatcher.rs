//! Single-flight FIFO storage transfers

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cloudlink_domain::{
    AtomicProgressState, CloudLinkError, ProgressState, Result, StorageObject, TransferDirection,
    TransferEvent,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::ports::StorageTransport;
use crate::auth::BearerSession;
use crate::scheduler::{Monitor, Scheduler};

/// Caller-owned content of a transfer
pub enum TransferStream {
    /// Source of an upload
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Destination of a download
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl std::fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reader(_) => f.write_str("TransferStream::Reader"),
            Self::Writer(_) => f.write_str("TransferStream::Writer"),
        }
    }
}

/// An upload or download waiting to be queued
#[derive(Debug)]
pub struct TransferRequest {
    object: StorageObject,
    stream: TransferStream,
}

impl TransferRequest {
    /// Upload `reader` into `object`. The object is allocated first unless it
    /// already has a URI.
    pub fn upload(object: StorageObject, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self { object, stream: TransferStream::Reader(Box::new(reader)) }
    }

    /// Download `object` (which must have a URI) into `writer`.
    pub fn download(
        object: StorageObject,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self { object, stream: TransferStream::Writer(Box::new(writer)) }
    }

    pub fn direction(&self) -> TransferDirection {
        match self.stream {
            TransferStream::Reader(_) => TransferDirection::Upload,
            TransferStream::Writer(_) => TransferDirection::Download,
        }
    }
}

struct Transfer {
    id: Uuid,
    direction: TransferDirection,
    object: Mutex<StorageObject>,
    state: AtomicProgressState,
    bytes: AtomicU64,
    stream: Mutex<Option<TransferStream>>,
}

impl Transfer {
    fn event(&self, state: ProgressState, error: Option<CloudLinkError>) -> TransferEvent {
        let object = self.object.lock();
        TransferEvent {
            transfer_id: self.id,
            name: object.name.clone(),
            direction: self.direction,
            state,
            bytes_transferred: self.bytes.load(Ordering::Acquire),
            total_bytes: object.length,
            retryable: error.as_ref().is_some_and(CloudLinkError::is_retryable),
            error,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.state.load() == ProgressState::Cancelled {
            return Err(CloudLinkError::Cancelled(format!("transfer {} cancelled", self.id)));
        }
        Ok(())
    }
}

/// Caller's view of a queued transfer
#[derive(Clone)]
pub struct TransferHandle(Arc<Transfer>);

impl TransferHandle {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn direction(&self) -> TransferDirection {
        self.0.direction
    }

    pub fn state(&self) -> ProgressState {
        self.0.state.load()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.0.bytes.load(Ordering::Acquire)
    }

    /// Object metadata, including the URI once allocated
    pub fn object(&self) -> StorageObject {
        self.0.object.lock().clone()
    }

    /// Hand the caller's stream back. `None` until the transfer is terminal,
    /// or if it was already taken.
    pub fn take_stream(&self) -> Option<TransferStream> {
        if !self.state().is_terminal() {
            return None;
        }
        self.0.stream.lock().take()
    }
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("id", &self.0.id)
            .field("direction", &self.0.direction)
            .field("state", &self.state())
            .field("bytes", &self.bytes_transferred())
            .finish()
    }
}

struct Pump {
    transport: Arc<dyn StorageTransport>,
    session: Arc<BearerSession>,
    chunk_size: usize,
    queue: Mutex<VecDeque<Arc<Transfer>>>,
    active: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl Pump {
    fn emit(&self, transfer: &Transfer, state: ProgressState, error: Option<CloudLinkError>) {
        let _ = self.events.send(transfer.event(state, error));
    }

    fn is_busy(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start the next queued transfer if nothing is in flight and no token
    /// refresh is underway.
    fn tick(self: &Arc<Self>) {
        if self.session.is_refreshing() {
            debug!("token refresh in flight; storage pump paused");
            return;
        }

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let Some(next) = self.queue.lock().pop_front() else {
            *active = None;
            return;
        };
        *active = Some(tokio::spawn(Arc::clone(self).drive(next)));
    }

    #[instrument(skip_all, fields(transfer_id = %transfer.id, direction = ?transfer.direction))]
    async fn drive(self: Arc<Self>, transfer: Arc<Transfer>) {
        // Cancelled between pop and spawn; `cancel` already reported it.
        if transfer.state.transition(ProgressState::InProgress).is_err() {
            return;
        }
        self.emit(&transfer, ProgressState::InProgress, None);

        let mut stream = transfer.stream.lock().take();
        let result = match stream.as_mut() {
            Some(TransferStream::Reader(reader)) => self.upload(&transfer, reader).await,
            Some(TransferStream::Writer(writer)) => self.download(&transfer, writer).await,
            None => Err(CloudLinkError::Internal("transfer stream missing".into())),
        };
        *transfer.stream.lock() = stream;

        let outcome = match result {
            Ok(()) => transfer.state.transition(ProgressState::Completed).map(|_| None),
            Err(CloudLinkError::Cancelled(_)) => Err(ProgressState::Cancelled),
            Err(error) => transfer.state.transition(ProgressState::Failed).map(|_| Some(error)),
        };

        match outcome {
            Ok(None) => {
                info!(bytes = transfer.bytes.load(Ordering::Acquire), "transfer completed");
                self.emit(&transfer, ProgressState::Completed, None);
            }
            Ok(Some(error)) => {
                if error.is_retryable() {
                    warn!(error = %error, "transfer failed; retryable");
                } else {
                    error!(error = %error, "transfer failed");
                }
                self.emit(&transfer, ProgressState::Failed, Some(error));
            }
            Err(_) => {
                info!("transfer cancelled while in progress");
                self.emit(&transfer, ProgressState::Cancelled, None);
            }
        }
    }

    async fn upload(
        &self,
        transfer: &Transfer,
        reader: &mut Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<()> {
        let existing = transfer.object.lock().uri.clone();
        let uri = match existing {
            Some(uri) => uri,
            None => {
                let metadata = transfer.object.lock().clone();
                let uri = self.transport.allocate(&metadata).await?;
                transfer.object.lock().uri = Some(uri.clone());
                uri
            }
        };
        let total = transfer.object.lock().length;

        let mut buffer = vec![0_u8; self.chunk_size];
        let mut offset = 0_u64;
        loop {
            transfer.check_cancelled()?;
            let filled = fill(reader, &mut buffer).await?;
            if filled == 0 {
                break;
            }
            self.transport.put_chunk(&uri, offset, &buffer[..filled], total).await?;
            offset += filled as u64;
            self.progress(transfer, offset);
            if filled < buffer.len() {
                break;
            }
        }
        Ok(())
    }

    async fn download(
        &self,
        transfer: &Transfer,
        writer: &mut Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Result<()> {
        let (uri, total) = {
            let object = transfer.object.lock();
            (object.uri.clone(), object.length)
        };
        let uri = uri.ok_or_else(|| CloudLinkError::Validation("download requires a uri".into()))?;

        let mut offset = 0_u64;
        loop {
            transfer.check_cancelled()?;
            let want = match total {
                Some(total) => total.saturating_sub(offset).min(self.chunk_size as u64) as usize,
                None => self.chunk_size,
            };
            if want == 0 {
                break;
            }
            let chunk = self.transport.get_chunk(&uri, offset, want).await?;
            if chunk.is_empty() {
                break;
            }
            writer.write_all(&chunk).await.map_err(local_io)?;
            offset += chunk.len() as u64;
            self.progress(transfer, offset);
            if chunk.len() < want {
                break;
            }
        }
        writer.flush().await.map_err(local_io)?;
        Ok(())
    }

    fn progress(&self, transfer: &Transfer, bytes: u64) {
        transfer.bytes.store(bytes, Ordering::Release);
        // A cancel that raced this chunk is reported by `drive`, not here.
        if transfer.state.load() == ProgressState::InProgress {
            self.emit(transfer, ProgressState::InProgress, None);
        }
    }
}

async fn fill(reader: &mut Box<dyn AsyncRead + Send + Unpin>, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..]).await.map_err(local_io)?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn local_io(error: std::io::Error) -> CloudLinkError {
    CloudLinkError::Internal(format!("local stream: {error}"))
}

/// Storage dispatcher
///
/// Transfers run strictly one at a time in the order they were queued. The
/// scheduler tick only decides whether to start the next transfer; the
/// transfer itself runs on its own task so the shared tick stays short.
pub struct StorageDispatcher {
    pump: Arc<Pump>,
    monitor: Monitor,
}

impl StorageDispatcher {
    pub fn new(
        transport: Arc<dyn StorageTransport>,
        session: Arc<BearerSession>,
        scheduler: &Scheduler,
        chunk_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let pump = Arc::new(Pump {
            transport,
            session,
            chunk_size: chunk_size.max(1),
            queue: Mutex::new(VecDeque::new()),
            active: Mutex::new(None),
            events,
        });

        let ticking = Arc::clone(&pump);
        let monitor = scheduler.monitor("storage-dispatch", move || {
            ticking.tick();
            futures::future::ready(ControlFlow::Continue(()))
        });

        (Self { pump, monitor }, receiver)
    }

    /// Queue a transfer behind any already waiting.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Validation` for invalid metadata or a download
    /// without a URI.
    pub fn queue(&self, request: TransferRequest) -> Result<TransferHandle> {
        request.object.validate()?;
        let direction = request.direction();
        if direction == TransferDirection::Download && request.object.uri.is_none() {
            return Err(CloudLinkError::Validation(format!(
                "download of '{}' requires a uri",
                request.object.name
            )));
        }

        let transfer = Arc::new(Transfer {
            id: Uuid::now_v7(),
            direction,
            object: Mutex::new(request.object),
            state: AtomicProgressState::new(ProgressState::Queued),
            bytes: AtomicU64::new(0),
            stream: Mutex::new(Some(request.stream)),
        });
        debug!(transfer_id = %transfer.id, ?direction, "transfer queued");

        self.pump.queue.lock().push_back(Arc::clone(&transfer));
        self.pump.emit(&transfer, ProgressState::Queued, None);
        Ok(TransferHandle(transfer))
    }

    /// Cancel a transfer. A queued transfer is removed and never started; an
    /// in-progress one stops at the next chunk boundary and ends CANCELLED.
    ///
    /// Returns `false` if the transfer had already finished.
    pub fn cancel(&self, handle: &TransferHandle) -> bool {
        let transfer = &handle.0;
        match transfer.state.transition(ProgressState::Cancelled) {
            Ok(ProgressState::Queued) => {
                self.pump.queue.lock().retain(|queued| !Arc::ptr_eq(queued, transfer));
                info!(transfer_id = %transfer.id, "queued transfer cancelled");
                self.pump.emit(transfer, ProgressState::Cancelled, None);
                true
            }
            Ok(_) => {
                info!(transfer_id = %transfer.id, "cancelling in-progress transfer");
                true
            }
            Err(state) => {
                debug!(transfer_id = %transfer.id, ?state, "cancel ignored");
                false
            }
        }
    }

    /// Transfers waiting to start
    pub fn pending(&self) -> usize {
        self.pump.queue.lock().len()
    }

    /// Whether a transfer is in flight
    pub fn is_busy(&self) -> bool {
        self.pump.is_busy()
    }

    pub fn start(&self) -> bool {
        self.monitor.start()
    }

    /// Stop starting new transfers. An in-flight transfer runs to its end.
    pub fn stop(&self) -> bool {
        self.monitor.stop()
    }
}
