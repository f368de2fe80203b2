//! Recurring tick sources
//!
//! An [`Interval`] yields ticks at a fixed period. Unlike a bare
//! [`tokio::time::Interval`], the first tick can be delayed by one period so
//! that periodic work never fires the instant it is started.

use std::time::Duration;

use tokio::time::{Instant, Interval as TokioInterval, MissedTickBehavior};

/// Configuration for an interval
#[derive(Debug, Clone)]
pub struct IntervalConfig {
    /// Base period between ticks
    pub period: Duration,

    /// Whether to skip missed ticks instead of bursting to catch up
    pub skip_missed_ticks: bool,

    /// Whether the first tick waits one full period
    pub delay_first_tick: bool,
}

impl IntervalConfig {
    /// Create a new interval configuration
    pub fn new(period: Duration) -> Self {
        Self { period, skip_missed_ticks: true, delay_first_tick: true }
    }

    /// Set whether to skip missed ticks
    pub fn skip_missed_ticks(mut self, skip: bool) -> Self {
        self.skip_missed_ticks = skip;
        self
    }

    /// Set whether the first tick is delayed by one period
    pub fn delay_first_tick(mut self, delay: bool) -> Self {
        self.delay_first_tick = delay;
        self
    }
}

/// A recurring interval
pub struct Interval {
    period: Duration,
    inner: TokioInterval,
}

impl Interval {
    /// Create a new interval
    ///
    /// Must be called from within a tokio runtime. A zero period is raised to
    /// one millisecond.
    pub fn new(config: IntervalConfig) -> Self {
        let period = config.period.max(Duration::from_millis(1));
        let start = if config.delay_first_tick { Instant::now() + period } else { Instant::now() };

        let mut inner = tokio::time::interval_at(start, period);
        let behavior = if config.skip_missed_ticks {
            MissedTickBehavior::Skip
        } else {
            MissedTickBehavior::Burst
        };
        inner.set_missed_tick_behavior(behavior);

        Self { period, inner }
    }

    /// Create an interval whose first tick is one period away
    pub fn delayed(period: Duration) -> Self {
        Self::new(IntervalConfig::new(period))
    }

    /// Base period of this interval
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick
    pub async fn tick(&mut self) -> Instant {
        self.inner.tick().await
    }
}
