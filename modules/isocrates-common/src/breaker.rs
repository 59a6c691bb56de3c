//! Per-endpoint circuit breaker and a wall-clock timeout wrapper around any
//! unit of async work. One breaker instance per endpoint label, held in a
//! process-global registry keyed by that label — the only unavoidable
//! process-global state in the workspace.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use thiserror::Error;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("circuit open for endpoint '{endpoint}', retry after {retry_after:?}")]
pub struct CircuitBreakerOpen {
    pub endpoint: String,
    pub retry_after: Duration,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Three-state breaker (CLOSED / OPEN / HALF_OPEN) for one LLM endpoint.
/// All state transitions happen under one mutex so concurrent scouts or
/// writers sharing a breaker observe a consistent state machine.
pub struct Breaker {
    endpoint: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl Breaker {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECONDS),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Call before attempting a request. Transitions OPEN -> HALF_OPEN once
    /// the cooldown has elapsed and allows exactly one probe through.
    pub fn check(&self) -> Result<(), CircuitBreakerOpen> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(CircuitBreakerOpen {
                        endpoint: self.endpoint.clone(),
                        retry_after: self.cooldown - elapsed,
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
        } else if inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, &'static Breaker>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, &'static Breaker>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fetch (or create) the breaker for an endpoint label. Breakers live for
/// the lifetime of the process; `get_breaker` never removes entries.
pub fn get_breaker(endpoint: &str) -> &'static Breaker {
    let mut map = registry().lock().unwrap();
    if let Some(b) = map.get(endpoint) {
        return b;
    }
    let leaked: &'static Breaker = Box::leak(Box::new(Breaker::new(endpoint)));
    map.insert(endpoint.to_string(), leaked);
    leaked
}

/// Test-only: drop all breaker state so tests don't leak cross-test.
pub fn reset_all() {
    registry().lock().unwrap().clear();
}

#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerOpen),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Inner(E),
}

/// Run `fut` under a wall-clock deadline, consulting and updating the
/// breaker for `label`. Timeout is reported distinctly from the inner
/// future's own error so callers can tell "never got an answer" from
/// "got an answer and it was an error".
pub async fn run_with_timeout<T, E, Fut>(
    label: &str,
    timeout: Duration,
    fut: Fut,
) -> Result<T, RunError<E>>
where
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let breaker = get_breaker(label);
    breaker.check()?;
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => {
            breaker.record_success();
            Ok(value)
        }
        Ok(Err(e)) => {
            breaker.record_failure();
            Err(RunError::Inner(e))
        }
        Err(_) => {
            breaker.record_failure();
            Err(RunError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn closed_allows_everything_with_zero_failures() {
        reset_all();
        let b = get_breaker("test-endpoint-zero-failures");
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.check().is_ok());
    }

    #[test]
    #[serial]
    fn opens_after_threshold_consecutive_failures() {
        reset_all();
        let b = get_breaker("test-endpoint-threshold");
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.check().is_err());
    }

    #[test]
    #[serial]
    fn success_does_not_clear_open_outside_half_open() {
        reset_all();
        let b = get_breaker("test-endpoint-open-success");
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    #[serial]
    async fn run_with_timeout_reports_timeout_distinct_from_inner_error() {
        reset_all();
        let result: Result<(), RunError<anyhow::Error>> = run_with_timeout(
            "test-endpoint-timeout",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(RunError::Timeout(_))));
    }

    #[tokio::test]
    #[serial]
    async fn run_with_timeout_propagates_inner_error() {
        reset_all();
        let result: Result<(), RunError<anyhow::Error>> =
            run_with_timeout("test-endpoint-inner-error", Duration::from_secs(1), async {
                Err(anyhow::anyhow!("boom"))
            })
            .await;
        assert!(matches!(result, Err(RunError::Inner(_))));
    }
}
