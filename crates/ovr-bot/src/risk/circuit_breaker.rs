//! Execution circuit breaker.
//!
//! Protects the order path from a broken venue: after N consecutive
//! failures the breaker opens and incoming commands are rejected locally
//! (reason `"sniper_open"`) until the cooldown elapses. The first command
//! after cooldown runs as a half-open probe; a probe failure re-opens with a
//! doubled cooldown, capped at five minutes, and a probe success closes the
//! breaker and resets the cooldown to its base.
//!
//! All operations are lock-free; `acquire()` on the closed path is a single
//! atomic load.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Rejection reason attached to locally-refused commands.
pub const OPEN_REJECT_REASON: &str = "sniper_open";

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before tripping.
    pub max_consecutive_failures: u32,
    /// Cooldown after the first trip.
    pub base_cooldown: Duration,
    /// Cap for the doubling cooldown.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// Breaker state, derived from the atomic flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

/// Lock-free circuit breaker with doubling cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    tripped: AtomicBool,
    half_open: AtomicBool,
    consecutive_failures: AtomicU32,
    /// Millis since epoch of the last trip.
    trip_time_ms: AtomicI64,
    /// Current cooldown in millis; doubles on half-open failure.
    cooldown_ms: AtomicU64,
    total_trips: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown_ms = config.base_cooldown.as_millis() as u64;
        Self {
            config,
            tripped: AtomicBool::new(false),
            half_open: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            trip_time_ms: AtomicI64::new(0),
            cooldown_ms: AtomicU64::new(cooldown_ms),
            total_trips: AtomicU32::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }

    /// May the next command be attempted? Closed: yes. Open: only once the
    /// cooldown has elapsed, which transitions to half-open (the caller's
    /// attempt is the probe).
    pub fn acquire(&self) -> bool {
        if !self.tripped.load(Ordering::Acquire) {
            return true;
        }
        if self.half_open.load(Ordering::Acquire) {
            return true;
        }
        if self.cooldown_elapsed() {
            self.half_open.store(true, Ordering::Release);
            self.consecutive_failures.store(0, Ordering::Release);
            return true;
        }
        false
    }

    /// Record a successful order. Closes the breaker from half-open and
    /// resets the doubling cooldown.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.half_open.swap(false, Ordering::AcqRel) {
            self.tripped.store(false, Ordering::Release);
            self.cooldown_ms.store(
                self.config.base_cooldown.as_millis() as u64,
                Ordering::Release,
            );
        }
    }

    /// Record a failed order. Returns true if the breaker tripped now.
    pub fn record_failure(&self) -> bool {
        // A half-open probe failure re-trips immediately with double cooldown.
        if self.half_open.swap(false, Ordering::AcqRel) {
            let doubled = (self.cooldown_ms.load(Ordering::Acquire) * 2)
                .min(self.config.max_cooldown.as_millis() as u64);
            self.cooldown_ms.store(doubled, Ordering::Release);
            self.trip();
            return true;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.max_consecutive_failures {
            self.trip();
            return true;
        }
        false
    }

    pub fn state(&self) -> BreakerState {
        if !self.tripped.load(Ordering::Acquire) {
            BreakerState::Closed
        } else if self.half_open.load(Ordering::Acquire) {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn total_trips(&self) -> u32 {
        self.total_trips.load(Ordering::Relaxed)
    }

    /// Current cooldown, for logging.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms.load(Ordering::Acquire))
    }

    fn trip(&self) {
        if !self.tripped.swap(true, Ordering::AcqRel) {
            self.total_trips.fetch_add(1, Ordering::Relaxed);
        }
        self.trip_time_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
    }

    fn cooldown_elapsed(&self) -> bool {
        let trip_time = self.trip_time_ms.load(Ordering::Acquire);
        let elapsed = chrono::Utc::now().timestamp_millis() - trip_time;
        elapsed >= self.cooldown_ms.load(Ordering::Acquire) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            max_consecutive_failures: 3,
            base_cooldown: Duration::from_millis(10),
            max_cooldown: Duration::from_millis(80),
        })
    }

    #[test]
    fn test_closed_by_default() {
        let cb = CircuitBreaker::with_defaults();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.acquire());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_trips_after_consecutive_failures() {
        let cb = fast_breaker();
        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert!(cb.acquire());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.acquire());
        assert_eq!(cb.total_trips(), 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = fast_breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_success_closes() {
        let cb = fast_breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.acquire());

        std::thread::sleep(Duration::from_millis(15));
        // Cooldown elapsed: next acquire is the half-open probe.
        assert!(cb.acquire());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.cooldown(), Duration::from_millis(10));
    }

    #[test]
    fn test_half_open_probe_failure_doubles_cooldown() {
        let cb = fast_breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.acquire());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.cooldown(), Duration::from_millis(20));

        // Doubling caps at max_cooldown.
        for _ in 0..4 {
            std::thread::sleep(cb.cooldown());
            assert!(cb.acquire());
            cb.record_failure();
        }
        assert_eq!(cb.cooldown(), Duration::from_millis(80));
    }

    #[test]
    fn test_open_rejects_until_cooldown() {
        let cb = fast_breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        for _ in 0..10 {
            assert!(!cb.acquire());
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.acquire());
    }
}
