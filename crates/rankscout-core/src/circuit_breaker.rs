use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Runtime circuit state for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Breaker phase carrying the data each state needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        last_failure: Instant,
        consecutive_failures: u32,
    },
    HalfOpen {
        trials: u32,
        consecutive_failures: u32,
    },
}

/// Input to the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    /// A caller asks whether it may dispatch.
    Request,
    Success,
    Failure,
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Phase,
    /// Only meaningful for [`CircuitEvent::Request`].
    pub admitted: bool,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Closed {
            consecutive_failures: 0,
        }
    }
}

impl Phase {
    pub const fn state(self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub const fn consecutive_failures(self) -> u32 {
        match self {
            Self::Closed {
                consecutive_failures,
            }
            | Self::Open {
                consecutive_failures,
                ..
            }
            | Self::HalfOpen {
                consecutive_failures,
                ..
            } => consecutive_failures,
        }
    }

    /// Pure transition function for the breaker.
    pub fn on_event(self, event: CircuitEvent, config: &CircuitBreakerConfig, now: Instant) -> Transition {
        let failures = self.consecutive_failures();
        match (self, event) {
            (Self::Closed { .. }, CircuitEvent::Request) => admit(self),
            (Self::Closed { .. }, CircuitEvent::Success) => settle(Self::default()),
            (Self::Closed { .. }, CircuitEvent::Failure) => {
                let consecutive_failures = failures.saturating_add(1);
                if consecutive_failures >= config.failure_threshold.max(1) {
                    settle(Self::Open {
                        last_failure: now,
                        consecutive_failures,
                    })
                } else {
                    settle(Self::Closed {
                        consecutive_failures,
                    })
                }
            }

            (Self::Open { last_failure, .. }, CircuitEvent::Request) => {
                if now.duration_since(last_failure) >= config.open_timeout {
                    admit(Self::HalfOpen {
                        trials: 1,
                        consecutive_failures: failures,
                    })
                } else {
                    reject(self)
                }
            }
            // A call dispatched before the breaker opened may still report back.
            (Self::Open { .. }, CircuitEvent::Success) => settle(self),
            (Self::Open { .. }, CircuitEvent::Failure) => settle(Self::Open {
                last_failure: now,
                consecutive_failures: failures.saturating_add(1),
            }),

            (Self::HalfOpen { trials, .. }, CircuitEvent::Request) => {
                if trials < config.half_open_max_calls.max(1) {
                    admit(Self::HalfOpen {
                        trials: trials + 1,
                        consecutive_failures: failures,
                    })
                } else {
                    reject(self)
                }
            }
            (Self::HalfOpen { .. }, CircuitEvent::Success) => settle(Self::default()),
            (Self::HalfOpen { .. }, CircuitEvent::Failure) => settle(Self::Open {
                last_failure: now,
                consecutive_failures: failures.saturating_add(1),
            }),
        }
    }
}

fn admit(next: Phase) -> Transition {
    Transition {
        next,
        admitted: true,
    }
}

fn reject(next: Phase) -> Transition {
    Transition {
        next,
        admitted: false,
    }
}

fn settle(next: Phase) -> Transition {
    Transition {
        next,
        admitted: false,
    }
}

/// Thread-safe circuit breaker guarding provider network requests.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    phase: Mutex<Phase>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            phase: Mutex::new(Phase::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn can_proceed(&self) -> bool {
        self.apply(CircuitEvent::Request)
    }

    pub fn record_success(&self) {
        self.apply(CircuitEvent::Success);
    }

    pub fn record_failure(&self) {
        self.apply(CircuitEvent::Failure);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures()
    }

    fn apply(&self, event: CircuitEvent) -> bool {
        let mut phase = self.lock();
        let previous = phase.state();
        let transition = phase.on_event(event, &self.config, Instant::now());
        *phase = transition.next;

        let next = transition.next.state();
        if previous != next {
            match next {
                CircuitState::Open => warn!(
                    consecutive_failures = transition.next.consecutive_failures(),
                    from = ?previous,
                    "provider circuit opened"
                ),
                CircuitState::HalfOpen => info!("provider circuit half-open; admitting trial call"),
                CircuitState::Closed => info!(from = ?previous, "provider circuit closed"),
            }
        }

        transition.admitted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            open_timeout,
            half_open_max_calls: 1,
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = breaker(2, Duration::from_secs(30));

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_proceed());
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let breaker = breaker(3, Duration::from_secs(30));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_to_half_open_after_timeout_then_closes_on_success() {
        let breaker = breaker(1, Duration::from_secs(5));

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_proceed());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(breaker.can_proceed());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_restarts_cooldown() {
        let breaker = breaker(1, Duration::from_secs(5));

        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(breaker.can_proceed());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_proceed());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(breaker.can_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_limits_concurrent_trials() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_secs(1),
            half_open_max_calls: 2,
        });

        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(breaker.can_proceed());
        assert!(breaker.can_proceed());
        assert!(!breaker.can_proceed());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn transition_function_is_pure() {
        let config = CircuitBreakerConfig::default();
        let now = Instant::now();
        let phase = Phase::Closed {
            consecutive_failures: config.failure_threshold - 1,
        };

        let transition = phase.on_event(CircuitEvent::Failure, &config, now);
        assert_eq!(
            transition.next,
            Phase::Open {
                last_failure: now,
                consecutive_failures: config.failure_threshold,
            }
        );
        assert_eq!(phase.state(), CircuitState::Closed);
    }
}
