//! Time-based publish gate.
//!
//! Bounds render-thread wake-ups to one per interval regardless of how fast
//! the decoder produces frames. Excess publishes are dropped, never queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default publish interval: one frame at 30 fps.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// Sentinel for "nothing accepted yet".
const NEVER: u64 = u64::MAX;

/// Lock-free rate limiter keyed on wall-clock time.
///
/// Remembers when the last call was accepted; later calls pass only once a
/// full interval has elapsed since then.
#[derive(Debug)]
pub struct RateGate {
    /// Reference point for the stored nanosecond offsets
    origin: Instant,
    interval_ns: u64,
    /// Nanoseconds since `origin` of the last accepted call, or `NEVER`
    last_ns: AtomicU64,
}

impl RateGate {
    /// Creates a gate that accepts at most one call per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval_ns: interval.as_nanos().min(u64::MAX as u128) as u64,
            last_ns: AtomicU64::new(NEVER),
        }
    }

    /// Tries to pass the gate at `now`.
    ///
    /// Times earlier than the last accepted call are treated as zero elapsed
    /// time and dropped.
    pub fn try_pass_at(&self, now: Instant) -> bool {
        let now_ns = self.offset_ns(now);
        let mut last = self.last_ns.load(Ordering::Acquire);
        loop {
            if last != NEVER && now_ns.saturating_sub(last) < self.interval_ns {
                return false;
            }
            match self.last_ns.compare_exchange_weak(
                last,
                now_ns,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }

    /// Forgets the last accepted call so the next one passes.
    pub fn reset(&self) {
        self.last_ns.store(NEVER, Ordering::Release);
    }

    fn offset_ns(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin)
            .as_nanos()
            .min((NEVER - 1) as u128) as u64
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_INTERVAL)
    }
}
