//! Market-data staleness watchdog.
//!
//! The engine touches the watchdog on every tick and skips entries while it
//! reports the feed as stale. Exits still run on stale data.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::{system_clock, Clock};

pub trait Watchdog: Send + Sync {
    /// Tick heartbeat.
    fn touch(&self);

    fn should_block_entries(&self) -> bool;
}

impl<W: Watchdog + ?Sized> Watchdog for Arc<W> {
    fn touch(&self) {
        (**self).touch()
    }

    fn should_block_entries(&self) -> bool {
        (**self).should_block_entries()
    }
}

/// Never blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn touch(&self) {}

    fn should_block_entries(&self) -> bool {
        false
    }
}

/// Blocks entries once the feed has been silent for `silence_ms`.
///
/// The feed owner calls [`FeedWatchdog::record_update`] on every useful
/// message. Construction counts as the first update.
#[derive(Debug)]
pub struct FeedWatchdog {
    silence_ms: i64,
    last_update_ms: AtomicI64,
    ticks: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl FeedWatchdog {
    pub fn new(silence_ms: i64) -> Self {
        Self::with_clock(silence_ms, system_clock())
    }

    pub fn with_clock(silence_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            silence_ms,
            last_update_ms: AtomicI64::new(clock.now_ms()),
            ticks: AtomicU64::new(0),
            clock,
        }
    }

    pub fn record_update(&self) {
        self.last_update_ms
            .store(self.clock.now_ms(), Ordering::Release);
    }

    pub fn silence_ms(&self) -> i64 {
        self.clock.now_ms() - self.last_update_ms.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Watchdog for FeedWatchdog {
    fn touch(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn should_block_entries(&self) -> bool {
        self.silence_ms() >= self.silence_ms
    }
}
