//! Circuit Breaker (C2): wraps a `SnowflakeExecutor`, implementing the
//! closed/open/half-open state machine from spec §4.2.
//!
//! Grounded on the donor's DashMap-keyed, lock-free-read state pattern
//! (`services/mysql_pool_manager.rs`), generalized from a connection-pool
//! cache to a per-backend state machine guarded by a `Mutex` so
//! transitions (and half-open's single-probe admission) serialize
//! correctly (spec §4.2, §5).

use crate::utils::clock::Clock;
use crate::utils::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitState {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_probe_at: Option<DateTime<Utc>>,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_probe_at: Option<DateTime<Utc>>,
    half_open_probe_in_flight: bool,
}

/// One breaker instance per logical backend (profile), per spec §5:
/// "process-wide per logical backend... state transitions are serialized
/// by an internal mutex."
pub struct CircuitBreaker {
    backend_key: String,
    failure_threshold: u32,
    recovery_timeout: chrono::Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(backend_key: impl Into<String>, failure_threshold: u32, recovery_timeout_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend_key: backend_key.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout: chrono::Duration::seconds(recovery_timeout_secs as i64),
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                next_probe_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn backend_key(&self) -> &str {
        &self.backend_key
    }

    pub async fn snapshot(&self) -> CircuitState {
        let inner = self.inner.lock().await;
        CircuitState {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            next_probe_at: inner.next_probe_at,
        }
    }

    /// Runs `call` through the breaker. `call` is invoked at most once.
    /// Only errors for which `counts_as_breaker_failure` is true move the
    /// state machine; other errors propagate without affecting it (spec
    /// §4.2: "only expected exceptions... count toward failures").
    pub async fn call<F, Fut>(&self, call: F) -> ApiResult<crate::executor::Rows>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ApiResult<crate::executor::Rows>>,
    {
        if let Some(err) = self.admit().await? {
            return Err(err);
        }

        let result = call().await;
        self.record(&result).await;
        result
    }

    /// Returns `Ok(Some(err))` when the call must fail fast without
    /// reaching the backend (open state, or half-open with a probe
    /// already in flight).
    async fn admit(&self) -> ApiResult<Option<ApiError>> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Ok(None),
            BreakerState::Open => {
                let now = self.clock.now();
                if Some(now) >= inner.next_probe_at {
                    tracing::info!(backend = %self.backend_key, "circuit breaker half-open, admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    Ok(None)
                } else {
                    Ok(Some(ApiError::resource_busy(format!(
                        "circuit open for backend {}, retry after {:?}",
                        self.backend_key, inner.next_probe_at
                    ))))
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    Ok(Some(ApiError::resource_busy(format!(
                        "circuit half-open for backend {}, probe already in flight",
                        self.backend_key
                    ))))
                } else {
                    inner.half_open_probe_in_flight = true;
                    Ok(None)
                }
            }
        }
    }

    async fn record(&self, result: &ApiResult<crate::executor::Rows>) {
        let mut inner = self.inner.lock().await;
        match result {
            Ok(_) => {
                if inner.state != BreakerState::Closed {
                    tracing::info!(backend = %self.backend_key, "circuit breaker closing after successful probe");
                }
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.next_probe_at = None;
                inner.half_open_probe_in_flight = false;
            }
            Err(err) => {
                inner.half_open_probe_in_flight = false;
                if !err.counts_as_breaker_failure() {
                    return;
                }
                inner.failure_count += 1;
                inner.last_failure_at = Some(self.clock.now());
                if inner.state == BreakerState::HalfOpen || inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.next_probe_at = Some(self.clock.now() + self.recovery_timeout);
                    tracing::info!(backend = %self.backend_key, failures = inner.failure_count, "circuit breaker opening");
                }
            }
        }
    }
}

/// Manager for per-backend circuit breakers using `DashMap`, mirroring
/// the donor's `MySQLPoolManager` (lock-free get-or-create keyed by
/// backend identity instead of cluster id).
pub struct CircuitBreakerRegistry {
    breakers: dashmap::DashMap<String, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    recovery_timeout_secs: u64,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self { breakers: dashmap::DashMap::new(), failure_threshold, recovery_timeout_secs, clock }
    }

    pub fn get_or_create(&self, backend_key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(backend_key) {
            return existing.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(
            backend_key,
            self.failure_threshold,
            self.recovery_timeout_secs,
            self.clock.clone(),
        ));
        self.breakers.insert(backend_key.to_string(), breaker.clone());
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Rows;
    use crate::utils::clock::FixedClock;

    fn breaker(threshold: u32, recovery_secs: u64) -> (CircuitBreaker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        (CircuitBreaker::new("test", threshold, recovery_secs, clock.clone()), clock)
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let (cb, _clock) = breaker(2, 30);
        for _ in 0..2 {
            let _ = cb.call(|| async { Err(ApiError::connection("boom")) }).await;
        }
        assert_eq!(cb.snapshot().await.state, BreakerState::Open);
    }

    #[tokio::test]
    async fn fails_fast_while_open() {
        let (cb, _clock) = breaker(1, 30);
        let _ = cb.call(|| async { Err(ApiError::connection("boom")) }).await;
        let result = cb.call(|| async { Ok(Rows::default()) }).await;
        assert!(matches!(result, Err(ApiError::ResourceBusy { .. })));
    }

    #[tokio::test]
    async fn half_opens_after_recovery_timeout_and_recovers() {
        let (cb, clock) = breaker(1, 30);
        let _ = cb.call(|| async { Err(ApiError::connection("boom")) }).await;
        assert_eq!(cb.snapshot().await.state, BreakerState::Open);

        clock.advance(chrono::Duration::seconds(31));
        let result = cb.call(|| async { Ok(Rows::default()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.snapshot().await.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn unexpected_errors_do_not_trip_breaker() {
        let (cb, _clock) = breaker(1, 30);
        let _ = cb.call(|| async { Err(ApiError::authentication("bad creds")) }).await;
        assert_eq!(cb.snapshot().await.state, BreakerState::Closed);
    }
}
