//! Tick sources.
//!
//! Records are stamped with raw ticks, not wall-clock time. The registry
//! stores the tick frequency and the tick count at initialization so the
//! decoder can turn ticks into seconds since start.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Provider of monotonic ticks.
pub trait TickSource: Send + Sync {
    /// Current tick count. Never zero.
    fn ticks(&self) -> u64;

    /// Ticks per second.
    fn frequency(&self) -> u64;

    /// Wall-clock milliseconds since the Unix epoch, stored in the header
    /// for display.
    fn wall_clock_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Number of ticks in `duration`.
    fn ticks_in(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * u128::from(self.frequency()) / 1_000_000_000) as u64
    }
}

impl<T: TickSource + ?Sized> TickSource for Arc<T> {
    fn ticks(&self) -> u64 {
        (**self).ticks()
    }

    fn frequency(&self) -> u64 {
        (**self).frequency()
    }

    fn wall_clock_millis(&self) -> u64 {
        (**self).wall_clock_millis()
    }
}

/// Nanosecond ticks from the monotonic clock.
#[derive(Debug, Clone)]
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    /// Create a tick source counting from now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64 + 1
    }

    fn frequency(&self) -> u64 {
        1_000_000_000
    }
}

/// Manually driven ticks for tests.
///
/// Starts at one and only moves when told to.
#[derive(Debug)]
pub struct ManualTicks {
    current: AtomicU64,
    frequency: u64,
    wall_clock_millis: u64,
}

impl ManualTicks {
    /// Ticks at 1 MHz starting at one.
    pub fn new() -> Self {
        Self::with_frequency(1_000_000)
    }

    /// Ticks at the given frequency starting at one.
    pub fn with_frequency(frequency: u64) -> Self {
        Self {
            current: AtomicU64::new(1),
            frequency: frequency.max(1),
            wall_clock_millis: 0,
        }
    }

    /// Advance by `ticks`, returning the new count.
    pub fn advance(&self, ticks: u64) -> u64 {
        self.current.fetch_add(ticks, Ordering::SeqCst) + ticks
    }

    /// Advance by a duration's worth of ticks.
    pub fn advance_by(&self, duration: Duration) -> u64 {
        self.advance(self.ticks_in(duration))
    }

    /// Jump to an absolute tick count (clamped to at least one).
    pub fn set(&self, ticks: u64) {
        self.current.store(ticks.max(1), Ordering::SeqCst);
    }
}

impl Default for ManualTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ManualTicks {
    fn ticks(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn wall_clock_millis(&self) -> u64 {
        self.wall_clock_millis
    }
}
