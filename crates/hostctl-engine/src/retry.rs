//! Retry and circuit-breaker policy for activity dispatch.

use std::time::Duration;

use rand::Rng;

/// Configurable retry policy with exponential backoff and jitter.
///
/// An activity failing with a retryable error is re-attempted up to
/// `max_attempts` times; the delay between attempts grows exponentially
/// from `base_delay`, capped at `max_delay`, with up to `jitter_fraction`
/// of random jitter added to avoid a thundering herd of simultaneous
/// retries across a worker pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Fraction of the computed delay (0.0–1.0) added as random jitter.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy with retries disabled — every failure is terminal.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Compute the delay before attempt number `attempt` (1-indexed: the
    /// delay before the *second* attempt is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        let scaled = self.base_delay.saturating_mul(exp).min(self.max_delay);

        if self.jitter_fraction <= 0.0 {
            return scaled;
        }

        let jitter_range = scaled.as_secs_f64() * self.jitter_fraction;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((scaled.as_secs_f64() + jitter).max(0.0))
    }

    /// Whether `attempt` (1-indexed attempt number just made) can still be
    /// followed by another retry.
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Circuit-breaker configuration guarding an external dependency (a node
/// agent, PowerDNS, the ACME directory, …) from a pile-up of retries
/// during an outage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker trips open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial request.
    pub open_duration: Duration,
    /// Consecutive successes in the half-open state before the breaker
    /// closes again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected immediately without reaching the dependency.
    Open,
    /// A limited number of trial calls are let through to test recovery.
    HalfOpen,
}

/// A single circuit breaker tracking one external dependency's health.
///
/// One instance guards one dependency (e.g. one node's agent RPC
/// endpoint); the worker pool keeps a breaker per node/cluster keyed by
/// [`hostctl_types::Locality::queue_name`].
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: parking_lot::Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<std::time::Instant>,
}

impl CircuitBreaker {
    /// Build a closed breaker with the given config.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: parking_lot::Mutex::new(BreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call should be allowed through right now. An open breaker
    /// transitions itself to half-open once `open_duration` has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        match state.current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.open_duration {
                    state.current = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.current {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.current = CircuitState::Closed;
                    state.consecutive_failures = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match state.current {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.current = CircuitState::Open;
                    state.opened_at = Some(std::time::Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                state.current = CircuitState::Open;
                state.opened_at = Some(std::time::Instant::now());
                state.consecutive_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, for monitoring.
    pub fn state(&self) -> CircuitState {
        self.state.lock().current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy { jitter_fraction: 0.0, ..Default::default() };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(20), policy.max_delay);
    }

    #[test]
    fn has_attempts_remaining_respects_max() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };
        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
    }

    #[test]
    fn circuit_breaker_trips_open_after_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 2, ..Default::default() });
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn circuit_breaker_half_open_recovers_to_closed() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_millis(0),
            success_threshold: 1,
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow_request()); // transitions to half-open
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
