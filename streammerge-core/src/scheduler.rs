//! Frame scheduling primitives
//!
//! The composition loop awaits [`FrameScheduler::next_frame`] between frame
//! steps; that await is its only suspension point.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Interval, MissedTickBehavior};

#[async_trait]
pub trait FrameScheduler: Send + Sync {
    /// Resolve once, before the next frame should be drawn
    async fn next_frame(&self);
}

/// Display-refresh style scheduler backed by a tokio interval.
///
/// Late ticks are skipped rather than bursted, so a stalled host simply
/// continues at the next available tick.
pub struct IntervalScheduler {
    period: Duration,
    interval: Mutex<Option<Interval>>,
}

impl IntervalScheduler {
    /// A zero period is raised to one millisecond.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            interval: Mutex::new(None),
        }
    }

    /// Scheduler ticking `frame_rate` times per second (minimum 1)
    #[must_use]
    pub fn from_frame_rate(frame_rate: u32) -> Self {
        let nanos = 1_000_000_000 / u64::from(frame_rate.max(1));
        Self::new(Duration::from_nanos(nanos))
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl FrameScheduler for IntervalScheduler {
    async fn next_frame(&self) {
        let mut guard = self.interval.lock().await;
        let interval = guard.get_or_insert_with(|| {
            // The first tick of a fresh interval completes immediately; start
            // one period out instead.
            let start = tokio::time::Instant::now() + self.period;
            let mut interval = tokio::time::interval_at(start, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;
    }
}

/// Scheduler driven explicitly by calls to [`ManualScheduler::tick`]
#[derive(Debug)]
pub struct ManualScheduler {
    pending: Semaphore,
    delivered: AtomicU64,
}

impl ManualScheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Semaphore::const_new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Release `frames` pending ticks
    pub fn tick(&self, frames: usize) {
        self.pending.add_permits(frames);
    }

    /// Number of ticks consumed by waiters so far
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameScheduler for ManualScheduler {
    async fn next_frame(&self) {
        match self.pending.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.delivered.fetch_add(1, Ordering::AcqRel);
            }
            Err(_) => std::future::pending::<()>().await,
        }
    }
}
