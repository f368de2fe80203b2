//! Periodic callback driven by a [`Scheduler`](super::Scheduler)

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use cloudlink_common::time::Interval;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Future returned by a tick callback. `Break` stops the monitor.
pub type TickFuture = BoxFuture<'static, ControlFlow<()>>;

/// Zero-argument action invoked on every tick
pub type TickCallback = Arc<dyn Fn() -> TickFuture + Send + Sync>;

/// Box an async closure into a [`TickCallback`].
pub fn tick_callback<F, Fut>(callback: F) -> TickCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    Arc::new(move || callback().boxed())
}

#[derive(Default)]
struct MonitorState {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// A scheduled task
///
/// The callback never overlaps with itself or with any other monitor created
/// from the same scheduler: each tick holds the scheduler's flow lock for the
/// whole invocation.
pub struct Monitor {
    name: String,
    interval: Duration,
    flow: Arc<tokio::sync::Mutex<()>>,
    callback: TickCallback,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub(super) fn new(
        name: String,
        interval: Duration,
        flow: Arc<tokio::sync::Mutex<()>>,
        callback: TickCallback,
    ) -> Self {
        Self { name, interval, flow, callback, state: Mutex::new(MonitorState::default()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin ticking. Must be called inside a tokio runtime.
    ///
    /// Returns `false` (and does nothing) if already running.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(monitor = %self.name, "start ignored; already running");
            return false;
        }

        // Fresh token so a stopped monitor can be restarted.
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.name.clone(),
            self.interval,
            Arc::clone(&self.flow),
            Arc::clone(&self.callback),
            cancel.clone(),
        ));

        state.cancel = Some(cancel);
        state.handle = Some(handle);
        info!(monitor = %self.name, interval_ms = self.interval.as_millis() as u64, "monitor started");
        true
    }

    /// Halt further ticks.
    ///
    /// Safe to call repeatedly and from inside the monitor's own callback; a
    /// tick that is already executing runs to completion. Returns `false` if
    /// the monitor was not running.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        let Some(cancel) = state.cancel.take() else {
            return false;
        };
        cancel.cancel();
        let was_running = state.handle.take().is_some_and(|h| !h.is_finished());
        if was_running {
            info!(monitor = %self.name, "monitor stopped");
        }
        was_running
    }

    /// Stop and wait for the loop task to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        let handle = {
            let mut state = self.state.lock();
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            state.handle.take()
        };

        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(monitor = %self.name, error = %e, "monitor task panicked"),
                Err(_) => warn!(monitor = %self.name, "monitor task did not exit within timeout"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(cancel) = self.state.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    flow: Arc<tokio::sync::Mutex<()>>,
    callback: TickCallback,
    cancel: CancellationToken,
) {
    let mut ticks = Interval::delayed(interval);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }

        let _flow = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            guard = flow.lock() => guard,
        };

        if (callback)().await.is_break() {
            debug!(monitor = %name, "callback requested stop");
            break;
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    debug!(monitor = %name, "monitor loop exited");
}
