//! Wall-clock source for expiry math.
//!
//! # Responsibilities
//! - Provide "now" as milliseconds since the Unix epoch
//! - Allow tests to pin and advance time deterministically
//!
//! # Design Decisions
//! - Every expiry check in the crate goes through [`Clock`], never `SystemTime` directly
//! - Expiry is exclusive of the boundary instant: a deadline equal to now has not passed

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Reads the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Millis
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: Millis) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, ms: Millis) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Move forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// True once `now` is strictly past `deadline`.
///
/// Every "until t" in this crate therefore includes t itself: a block from three
/// failures at t=0,100,200 with a 2000ms block still denies at t=2200 and first
/// allows at t=2201, one millisecond later than a `now >= deadline` reading would.
pub fn has_elapsed(now: Millis, deadline: Millis) -> bool {
    now > deadline
}
