//! Time sources.
//!
//! Record creation times, version ids and transaction timestamps all come from a
//! [`Clock`], so tests can substitute a [`FixedClock`] and get reproducible
//! histories.

use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};

#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicU64, Ordering};

/// A provider of wall-clock timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// The same instant as a UTC datetime, for logs and display.
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis() as i64)
            .single()
            .unwrap_or_default()
    }
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Test clock that returns a controllable time.
///
/// Unlike the system clock it never advances on its own, which makes it easy to
/// produce several saves inside the same millisecond.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    /// Create a clock frozen at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::new(1704067200000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_frozen_until_advanced() {
        let clock = FixedClock::new(1000);
        assert_eq!(clock.now_millis(), 1000);
        assert_eq!(clock.now_millis(), 1000);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 1250);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn fixed_clock_utc() {
        let clock = FixedClock::default();
        assert!(clock.now_utc().to_rfc3339().starts_with("2024-01-01T00:00:00"));
    }

    #[test]
    fn system_clock_is_after_2024() {
        assert!(SystemClock.now_millis() > 1704067200000);
    }
}
