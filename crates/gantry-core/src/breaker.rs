//! Circuit breaker guarding upstream calls.
//!
//! The breaker is a three-state machine (closed, open, half-open) held in
//! atomics so the hot path never takes a lock. Transitions:
//!
//! - closed -> open once `failure_threshold` failures accumulate
//! - open -> half-open after `timeout_seconds` have elapsed since the last
//!   failure; the transition is a compare-and-set so that concurrent
//!   callers cannot perform it twice
//! - half-open -> closed after `success_threshold` consecutive successes
//! - half-open -> open on any single probe failure
//!
//! An owned [`HealthTracker`] records an EMA health score alongside the
//! state machine; the score is reported, never used to gate traffic.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{GatewayError, Result};
use crate::health::HealthTracker;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Point-in-time breaker statistics, serialized on the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub health_score: i64,
    pub failures: u64,
    pub successes: u64,
}

/// Circuit breaker with health scoring.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure: AtomicI64,
    failure_threshold: u64,
    success_threshold: u64,
    timeout_seconds: i64,
    health: HealthTracker,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// # Arguments
    /// * `failure_threshold` - failures before the circuit opens
    /// * `success_threshold` - half-open successes before the circuit closes
    /// * `timeout_seconds` - open duration before the next probe is allowed
    /// * `health_decay` - EMA decay factor for the health score
    pub fn new(
        failure_threshold: u64,
        success_threshold: u64,
        timeout_seconds: u64,
        health_decay: f64,
    ) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_failure: AtomicI64::new(0),
            failure_threshold,
            success_threshold,
            timeout_seconds: timeout_seconds as i64,
            health: HealthTracker::new(health_decay),
        }
    }

    /// Whether a request may proceed.
    ///
    /// Returns `true` in closed and half-open states. In the open state,
    /// returns `true` only once the open timeout has elapsed, in which case
    /// the winning caller transitions the breaker to half-open and zeroes
    /// the success count.
    pub fn allow(&self) -> bool {
        self.allow_at(unix_now())
    }

    fn allow_at(&self, now: i64) -> bool {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED | STATE_HALF_OPEN => true,
            STATE_OPEN => {
                if now >= self.last_failure.load(Ordering::Acquire) + self.timeout_seconds {
                    if self
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.success_count.store(0, Ordering::Release);
                    }
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Runs `op` through the breaker.
    ///
    /// Fails fast with [`GatewayError::BreakerOpen`] when the circuit
    /// rejects the call. Otherwise the operation's outcome is recorded
    /// (timeouts are classified separately for health scoring) and its
    /// error, if any, is propagated unchanged.
    pub async fn execute<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.allow() {
            return Err(GatewayError::BreakerOpen);
        }

        match op.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_timeout() {
                    self.record_timeout();
                } else {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Records a successful upstream call.
    pub fn record_success(&self) {
        self.health.record_success();
        let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;

        if self.state.load(Ordering::Acquire) == STATE_HALF_OPEN
            && successes >= self.success_threshold
        {
            self.state.store(STATE_CLOSED, Ordering::Release);
            self.failure_count.store(0, Ordering::Release);
        }
    }

    /// Records a failed upstream call.
    pub fn record_failure(&self) {
        self.health.record_failure();
        self.note_failure();
    }

    /// Records an upstream timeout. Timeouts count as failures for the
    /// state machine but weigh heavier on the health score.
    pub fn record_timeout(&self) {
        self.health.record_timeout();
        self.note_failure();
    }

    fn note_failure(&self) {
        self.last_failure.store(unix_now(), Ordering::Release);
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state.load(Ordering::Acquire) {
            // Any failure during a probe reopens the circuit.
            STATE_HALF_OPEN => self.state.store(STATE_OPEN, Ordering::Release),
            STATE_CLOSED if failures >= self.failure_threshold => {
                self.state.store(STATE_OPEN, Ordering::Release);
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn health_score(&self) -> i64 {
        self.health.score()
    }

    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state(),
            health_score: self.health.score(),
            failures: self.failure_count.load(Ordering::Acquire),
            successes: self.success_count.load(Ordering::Acquire),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, 2, 60, 0.95)
    }

    #[test]
    fn test_starts_closed_and_allows() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn test_opens_after_failure_threshold() {
        let b = breaker();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);

        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        let now = unix_now();
        assert!(!b.allow_at(now));
        assert!(!b.allow_at(now + 30));
        assert!(b.allow_at(now + 61));
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_transition_to_half_open_resets_success_count() {
        let b = breaker();
        b.record_success();
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.allow_at(unix_now() + 61));
        assert_eq!(b.stats().successes, 0);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.allow_at(unix_now() + 61));

        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.stats().failures, 0);
    }

    #[test]
    fn test_half_open_reopens_on_single_failure() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.allow_at(unix_now() + 61));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_concurrent_allow_transitions_once() {
        use std::sync::Arc;
        use std::thread;

        let b = Arc::new(breaker());
        for _ in 0..3 {
            b.record_failure();
        }
        let probe_time = unix_now() + 61;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                thread::spawn(move || b.allow_at(probe_time))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        // All callers are admitted but the state moved exactly once.
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.stats().successes, 0);
    }

    #[tokio::test]
    async fn test_execute_fails_fast_when_open() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }

        let result: Result<()> = b.execute(async { Ok(()) }).await;
        assert_eq!(result, Err(GatewayError::BreakerOpen));
    }

    #[tokio::test]
    async fn test_execute_propagates_error_unchanged() {
        let b = breaker();
        let result: Result<()> = b
            .execute(async { Err(GatewayError::UpstreamTransport("refused".into())) })
            .await;
        assert_eq!(
            result,
            Err(GatewayError::UpstreamTransport("refused".into()))
        );
        assert_eq!(b.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_execute_classifies_timeouts_for_health() {
        let transport = breaker();
        let timeout = breaker();

        let _: Result<()> = transport
            .execute(async { Err(GatewayError::UpstreamTransport("refused".into())) })
            .await;
        let _: Result<()> = timeout
            .execute(async { Err(GatewayError::UpstreamTimeout(5)) })
            .await;

        assert!(timeout.health_score() < transport.health_score());
    }

    #[tokio::test]
    async fn test_execute_records_success() {
        let b = breaker();
        let result = b.execute(async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
        assert_eq!(b.stats().successes, 1);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_stats_snapshot() {
        let b = breaker();
        b.record_failure();
        b.record_success();

        let stats = b.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.successes, 1);
        assert!(stats.health_score <= 100);
    }

    #[test]
    fn test_state_serializes_kebab_case() {
        let json = serde_json::to_string(&BreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"half-open\"");
    }
}
