//! Injected clock abstractions.
//!
//! The flush queue compares enqueue timestamps against a retention window
//! and a flush horizon, so it needs a monotonic clock it can trust; trace
//! file headers additionally carry a wall-clock timestamp. Both clocks are
//! injected as trait objects so tests can drive time by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::event::TimestampNanos;

/// Monotonic nanosecond clock. Successive calls never go backwards.
pub trait SteadyClock: Send + Sync {
    fn now(&self) -> TimestampNanos;
}

/// Wall-clock nanosecond clock counting from the Unix epoch.
pub trait SystemClock: Send + Sync {
    fn now(&self) -> TimestampNanos;
}

// All steady timestamps in one process must share an epoch: they are
// compared across clock instances and embedded in trace file names.
fn process_steady_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Steady clock counting nanoseconds from a process-wide epoch captured on
/// first use.
#[derive(Debug, Default)]
pub struct ProcessSteadyClock;

impl ProcessSteadyClock {
    pub fn new() -> Self {
        // Pin the epoch now so the first timestamp is close to zero.
        let _ = process_steady_epoch();
        Self
    }
}

impl SteadyClock for ProcessSteadyClock {
    fn now(&self) -> TimestampNanos {
        process_steady_epoch().elapsed().as_nanos() as TimestampNanos
    }
}

/// System clock backed by [`SystemTime`].
#[derive(Debug, Default)]
pub struct UnixSystemClock;

impl UnixSystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl SystemClock for UnixSystemClock {
    fn now(&self) -> TimestampNanos {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(duration) => duration.as_nanos() as TimestampNanos,
            // Clock set before 1970; report the negative offset.
            Err(error) => -(error.duration().as_nanos() as TimestampNanos),
        }
    }
}

/// Hand-driven clock for tests. Implements both clock traits; `advance`
/// and `set` are atomic so worker threads observe updates immediately.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: TimestampNanos) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance(&self, nanos: TimestampNanos) {
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn set(&self, now: TimestampNanos) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl SteadyClock for ManualClock {
    fn now(&self) -> TimestampNanos {
        self.now.load(Ordering::SeqCst)
    }
}

impl SystemClock for ManualClock {
    fn now(&self) -> TimestampNanos {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_clock_is_monotonic() {
        let clock = ProcessSteadyClock::new();
        let mut previous = clock.now();
        for _ in 0..1_000 {
            let now = clock.now();
            assert!(previous <= now);
            previous = now;
        }
    }

    #[test]
    fn test_steady_clock_instances_share_an_epoch() {
        let first = ProcessSteadyClock::new();
        let second = ProcessSteadyClock::new();
        let a = first.now();
        let b = second.now();
        // Same epoch: readings interleave on one timeline.
        assert!(a <= b);
    }

    #[test]
    fn test_system_clock_is_after_unix_epoch() {
        let clock = UnixSystemClock::new();
        assert!(clock.now() > 0);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new(100);
        assert_eq!(SteadyClock::now(&clock), 100);
        clock.advance(50);
        assert_eq!(SteadyClock::now(&clock), 150);
        clock.set(7);
        assert_eq!(SystemClock::now(&clock), 7);
    }
}
