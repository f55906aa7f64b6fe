//! Categorized retry with exponential backoff and a per-endpoint circuit breaker.
//!
//! # Breaker state machine
//!
//! ```text
//! CLOSED    -> OPEN      (consecutive failures >= threshold)
//! OPEN      -> HALF_OPEN (cooldown elapsed; one probe admitted)
//! HALF_OPEN -> CLOSED    (probe succeeds)
//! HALF_OPEN -> OPEN      (probe fails)
//! ```

use crate::gateway::{GatewayError, RetryCategory};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry policy for gateway calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Base delay for network/timeout errors.
    pub network_base: Duration,
    /// Base delay for rate-limit errors.
    pub rate_limit_base: Duration,
    /// Base delay for generic transient errors.
    pub generic_base: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            network_base: Duration::from_millis(250),
            rate_limit_base: Duration::from_millis(1000),
            generic_base: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    fn backoff_for(&self, category: RetryCategory) -> ExponentialBackoff {
        let base = match category {
            RetryCategory::RateLimit => self.rate_limit_base,
            RetryCategory::Network => self.network_base,
            RetryCategory::Generic => self.generic_base,
        };
        ExponentialBackoff {
            initial_interval: base,
            max_interval: self.max_delay,
            multiplier: 2.0,
            // No overall deadline; the attempt cap bounds the loop.
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Tracks consecutive failures for one logical endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: &'static str, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            endpoint,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may be issued right now. An open circuit whose cooldown
    /// has elapsed admits exactly one probe (half-open); further calls are
    /// rejected until the probe resolves.
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    debug!(endpoint = self.endpoint, "circuit breaker admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state != BreakerState::Closed {
            debug!(endpoint = self.endpoint, "circuit breaker closing");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        let should_open = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if should_open && inner.state != BreakerState::Open {
            warn!(
                endpoint = self.endpoint,
                failures = inner.consecutive_failures,
                "circuit breaker opening"
            );
        }
        if should_open {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Lazily-created circuit breakers keyed by logical endpoint.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<&'static str, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        BreakerRegistry {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, endpoint: &'static str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock poisoned");
        breakers
            .entry(endpoint)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.clone())))
            .clone()
    }
}

/// Run `op` with categorized retry and circuit-breaker accounting.
///
/// Terminal errors propagate immediately. Retryable errors back off with
/// jittered exponential delays whose base depends on the error category.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    breaker: &CircuitBreaker,
    endpoint: &'static str,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut network_backoff = config.backoff_for(RetryCategory::Network);
    let mut rate_limit_backoff = config.backoff_for(RetryCategory::RateLimit);
    let mut generic_backoff = config.backoff_for(RetryCategory::Generic);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if !breaker.is_call_permitted() {
            return Err(GatewayError::CircuitOpen(endpoint));
        }

        match op().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(err) => {
                breaker.record_failure();
                let Some(category) = err.retry_category() else {
                    return Err(err);
                };
                if attempt >= config.max_attempts {
                    warn!(
                        endpoint,
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }

                let machine = match category {
                    RetryCategory::Network => &mut network_backoff,
                    RetryCategory::RateLimit => &mut rate_limit_backoff,
                    RetryCategory::Generic => &mut generic_backoff,
                };
                let delay = machine.next_backoff().unwrap_or(config.max_delay);
                debug!(
                    endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying gateway call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            network_base: Duration::from_millis(1),
            rate_limit_base: Duration::from_millis(1),
            generic_base: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(10, 1000);
        let result: Result<(), _> = with_retry(&fast_retry(), &breaker, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Authentication("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(GatewayError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_error_retried_until_success() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(10, 1000);
        let result = with_retry(&fast_retry(), &breaker, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::Network("timeout".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_cap_respected() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(100, 1000);
        let result: Result<(), _> = with_retry(&fast_retry(), &breaker, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::RateLimited("429".into())) }
        })
        .await;

        assert!(matches!(result, Err(GatewayError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let breaker = breaker(3, 60_000);
        assert!(breaker.is_call_permitted());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_call_permitted());
        breaker.record_failure();
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn test_breaker_half_open_probe_then_close() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        // Zero cooldown: next check admits exactly one probe.
        assert!(breaker.is_call_permitted());
        assert!(!breaker.is_call_permitted());
        breaker.record_success();
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn test_breaker_failed_probe_reopens() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        assert!(breaker.is_call_permitted());
        breaker.record_failure();
        // Cooldown is zero, so the circuit re-admits a probe immediately;
        // the point is that the failed probe put it back to open first.
        assert!(breaker.is_call_permitted());
        assert!(!breaker.is_call_permitted());
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_calls() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(1, 60_000);
        breaker.record_failure();

        let result: Result<(), _> = with_retry(&fast_retry(), &breaker, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(GatewayError::CircuitOpen("test"))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_returns_same_breaker_per_endpoint() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("orders");
        let b = registry.get("orders");
        let c = registry.get("balance");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
