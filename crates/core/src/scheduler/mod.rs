//! Cooperative periodic scheduling
//!
//! A [`Scheduler`] hands out [`Monitor`]s. Every monitor created from the same
//! scheduler shares one flow lock, so no two callbacks ever run at the same
//! time, within or across monitors. Callbacks should therefore be short:
//! network work is spawned from a tick and its result read on a later one.

mod monitor;

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use cloudlink_domain::constants::DEFAULT_POLLING_INTERVAL_MS;

pub use monitor::{tick_callback, Monitor, TickCallback, TickFuture};

/// Factory for monitors sharing one cadence and one execution flow
#[derive(Clone)]
pub struct Scheduler {
    cadence: Duration,
    flow: Arc<tokio::sync::Mutex<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS))
    }
}

impl Scheduler {
    pub fn new(cadence: Duration) -> Self {
        Self { cadence, flow: Arc::new(tokio::sync::Mutex::new(())) }
    }

    /// Library-wide default tick period
    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Create a monitor ticking at the default cadence.
    pub fn monitor<F, Fut>(&self, name: impl Into<String>, callback: F) -> Monitor
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        self.monitor_every(name, self.cadence, callback)
    }

    /// Create a monitor with an explicit interval hint.
    pub fn monitor_every<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        callback: F,
    ) -> Monitor
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        Monitor::new(name.into(), interval, Arc::clone(&self.flow), tick_callback(callback))
    }

    /// Run `work` inside the shared flow, waiting for any in-progress tick.
    pub async fn exclusive<T, Fut>(&self, work: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let _flow = self.flow.lock().await;
        work.await
    }
}
