//! Logical timestamp sources.
//!
//! Regions hand out timestamps that are used both as transaction-start
//! markers and as write markers in the update-timestamps ledger. The source
//! is injected into each region factory so that tests control time and two
//! cache managers in one process never share a counter.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::Timestamp;

/// Number of timestamp ticks per wall-clock millisecond.
pub const TICKS_PER_MS: i64 = 1 << 12;

/// A source of non-decreasing logical timestamps.
pub trait TimestampSource: fmt::Debug + Send + Sync {
    /// Next timestamp. Never lower than any value previously returned.
    fn next_timestamp(&self) -> Timestamp;

    /// Convert a staleness bound into timestamp units.
    fn timeout_units(&self, timeout: Duration) -> i64 {
        let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX / TICKS_PER_MS);
        millis.saturating_mul(TICKS_PER_MS)
    }
}

/// Wall-clock based timestamper: `millis << 12` plus a 12-bit counter.
///
/// Up to 4096 distinct timestamps are issued per millisecond; if the clock
/// stalls or steps backwards the counter keeps advancing from the last value.
#[derive(Debug, Default)]
pub struct MonotonicTimestamper {
    last: AtomicI64,
}

impl MonotonicTimestamper {
    /// Create a timestamper starting from the current wall clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimestampSource for MonotonicTimestamper {
    fn next_timestamp(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis().saturating_mul(TICKS_PER_MS);
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if wall > current { wall } else { current + 1 };
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }
}
