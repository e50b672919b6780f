//! Clock Abstraction
//!
//! Wall-clock time for stat-cache expiry, object timestamps, and the
//! garbage collector's staleness test. Production code uses [`RealClock`];
//! tests drive a [`SimulatedClock`] explicitly.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Clock trait for time operations
pub trait Clock: Send + Sync + 'static {
    /// Get current time
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since `since`; zero if `since` is in the future
    fn elapsed(&self, since: DateTime<Utc>) -> Duration {
        (self.now() - since).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Production clock using real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance()` or `set()`.
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    time_ns: Arc<AtomicI64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        SimulatedClock {
            time_ns: Arc::new(AtomicI64::new(to_nanos(start))),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let delta = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.time_ns.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, time: DateTime<Utc>) {
        self.time_ns.store(to_nanos(time), Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        from_nanos(self.time_ns.load(Ordering::SeqCst))
    }
}

fn to_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, subsec).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_real_clock_advances() {
        let clock = RealClock;
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > t1, "Time should advance");
    }

    #[test]
    fn test_simulated_clock_deterministic() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let clock = SimulatedClock::new(start);

        // Time doesn't advance on its own
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_nanos(1_500));
        assert_eq!((clock.now() - start).num_nanoseconds(), Some(1_500));

        let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::default();
        let clock2 = clock.clone();

        clock.advance(Duration::from_secs(100));
        assert_eq!(clock2.now().timestamp(), 100, "Clones should share state");
    }

    #[test]
    fn test_elapsed() {
        let clock = SimulatedClock::default();
        let start = clock.now();

        clock.advance(Duration::from_millis(250));

        assert_eq!(clock.elapsed(start), Duration::from_millis(250));

        let future = clock.now() + chrono::Duration::seconds(5);
        assert_eq!(clock.elapsed(future), Duration::ZERO);
    }
}
