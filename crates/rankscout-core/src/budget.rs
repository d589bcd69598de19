//! Token budget tracker mirroring the provider's server-side token bucket.
//!
//! The provider bills every call in tokens and refills the balance
//! continuously. [`TokenBudget`] keeps a local estimate so callers wait for
//! refill instead of tripping the provider's own limiter, and accepts
//! authoritative corrections through [`TokenBudget::sync`].

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Token bucket sizing and health thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudgetConfig {
    pub capacity: f64,
    pub refill_per_second: f64,
    /// Starting balance; `None` starts full.
    pub initial_tokens: Option<f64>,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    /// Forced pause applied once per acquire while below the critical threshold.
    pub critical_cooldown: Duration,
    /// Minimum spacing between degraded-health log events.
    pub health_log_interval: Duration,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            capacity: 1_200.0,
            refill_per_second: 20.0 / 60.0,
            initial_tokens: None,
            warning_threshold: 200.0,
            critical_threshold: 50.0,
            critical_cooldown: Duration::from_secs(10),
            health_log_interval: Duration::from_secs(60),
        }
    }
}

/// Coarse health of the local budget estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetHealth {
    Healthy,
    Degraded,
    Critical,
}

/// Continuous refill capped at `capacity`.
pub fn refill(available: f64, capacity: f64, rate_per_second: f64, elapsed: Duration) -> f64 {
    (available + elapsed.as_secs_f64() * rate_per_second)
        .min(capacity)
        .max(0.0)
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill: Instant,
    last_health_log: Option<Instant>,
}

enum Pause {
    Cooldown(Duration),
    Deficit(Duration),
}

/// Thread-safe token bucket shared by every gateway call.
#[derive(Debug)]
pub struct TokenBudget {
    config: TokenBudgetConfig,
    state: Mutex<BucketState>,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(TokenBudgetConfig::default())
    }
}

impl TokenBudget {
    pub fn new(config: TokenBudgetConfig) -> Self {
        let capacity = if config.capacity.is_finite() && config.capacity > 0.0 {
            config.capacity
        } else {
            1.0
        };
        let config = TokenBudgetConfig {
            capacity,
            refill_per_second: config.refill_per_second.max(1e-6),
            ..config
        };
        let available = config
            .initial_tokens
            .unwrap_or(capacity)
            .clamp(0.0, capacity);

        Self {
            config,
            state: Mutex::new(BucketState {
                available,
                last_refill: Instant::now(),
                last_health_log: None,
            }),
        }
    }

    pub fn config(&self) -> &TokenBudgetConfig {
        &self.config
    }

    /// Current available tokens after refill, without debiting.
    pub fn peek(&self) -> f64 {
        let mut state = self.lock();
        self.refill_locked(&mut state);
        state.available
    }

    pub fn health(&self) -> BudgetHealth {
        self.classify(self.peek())
    }

    /// Overwrites the local estimate with an authoritative balance.
    pub fn sync(&self, server_balance: f64) {
        if !server_balance.is_finite() {
            return;
        }
        let mut state = self.lock();
        self.refill_locked(&mut state);
        let corrected = server_balance.clamp(0.0, self.config.capacity);
        let drift = corrected - state.available;
        if drift.abs() >= 1.0 {
            debug!(
                local = state.available,
                server = corrected,
                drift,
                "token budget re-synced from provider"
            );
        }
        state.available = corrected;
    }

    /// Waits until `cost` tokens are available, then debits them.
    ///
    /// Costs above capacity are clamped to capacity so the wait stays bounded.
    pub async fn acquire(&self, cost: f64) {
        let cost = self.effective_cost(cost);
        let mut cooled_down = false;

        loop {
            let pause = {
                let mut state = self.lock();
                self.refill_locked(&mut state);
                self.observe_health(&mut state);

                if !cooled_down && state.available < self.config.critical_threshold {
                    Pause::Cooldown(self.config.critical_cooldown)
                } else if state.available >= cost {
                    state.available -= cost;
                    return;
                } else {
                    let deficit = cost - state.available;
                    let seconds = deficit / self.config.refill_per_second;
                    Pause::Deficit(Duration::from_secs_f64(seconds) + Duration::from_millis(1))
                }
            };

            match pause {
                Pause::Cooldown(duration) => {
                    cooled_down = true;
                    debug!(
                        cooldown_ms = duration.as_millis() as u64,
                        "token budget below critical threshold; cooling down"
                    );
                    tokio::time::sleep(duration).await;
                }
                Pause::Deficit(duration) => {
                    debug!(
                        cost,
                        wait_ms = duration.as_millis() as u64,
                        "waiting for token refill"
                    );
                    tokio::time::sleep(duration).await;
                }
            }
        }
    }

    fn effective_cost(&self, cost: f64) -> f64 {
        if !cost.is_finite() || cost <= 0.0 {
            return 0.0;
        }
        if cost > self.config.capacity {
            warn!(
                cost,
                capacity = self.config.capacity,
                "requested token cost exceeds bucket capacity; clamping"
            );
            return self.config.capacity;
        }
        cost
    }

    fn classify(&self, available: f64) -> BudgetHealth {
        if available < self.config.critical_threshold {
            BudgetHealth::Critical
        } else if available < self.config.warning_threshold {
            BudgetHealth::Degraded
        } else {
            BudgetHealth::Healthy
        }
    }

    fn observe_health(&self, state: &mut BucketState) {
        let health = self.classify(state.available);
        if health == BudgetHealth::Healthy {
            return;
        }

        let now = Instant::now();
        let due = state
            .last_health_log
            .map_or(true, |last| now.duration_since(last) >= self.config.health_log_interval);
        if due {
            state.last_health_log = Some(now);
            warn!(
                available = state.available,
                warning_threshold = self.config.warning_threshold,
                critical_threshold = self.config.critical_threshold,
                health = ?health,
                "token budget degraded"
            );
        }
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.available = refill(
            state.available,
            self.config.capacity,
            self.config.refill_per_second,
            elapsed,
        );
        state.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state
            .lock()
            .expect("token budget lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: f64, initial: f64, rate: f64) -> TokenBudgetConfig {
        TokenBudgetConfig {
            capacity,
            refill_per_second: rate,
            initial_tokens: Some(initial),
            warning_threshold: 0.0,
            critical_threshold: 0.0,
            critical_cooldown: Duration::from_secs(5),
            health_log_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        assert_eq!(refill(5.0, 10.0, 1.0, Duration::from_secs(3)), 8.0);
        assert_eq!(refill(5.0, 10.0, 1.0, Duration::from_secs(60)), 10.0);
        assert_eq!(refill(-3.0, 10.0, 0.0, Duration::ZERO), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_sequence_stays_within_bounds() {
        let budget = TokenBudget::new(config(20.0, 20.0, 2.0));

        for cost in [3.0, 7.5, 0.0, 12.0, 20.0, 1.0, 4.0, 19.0] {
            budget.acquire(cost).await;
            let available = budget.peek();
            assert!(available >= 0.0, "available went negative: {available}");
            assert!(available <= 20.0, "available exceeded capacity: {available}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_deficit_refill() {
        let budget = TokenBudget::new(config(10.0, 2.0, 1.0));
        let started = Instant::now();

        budget.acquire(5.0).await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(budget.peek() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_balance_forces_cooldown_even_for_small_cost() {
        let budget = TokenBudget::new(TokenBudgetConfig {
            critical_threshold: 5.0,
            critical_cooldown: Duration::from_secs(10),
            ..config(100.0, 1.0, 100.0)
        });
        let started = Instant::now();

        budget.acquire(1.0).await;

        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cost_above_capacity_is_clamped() {
        let budget = TokenBudget::new(config(10.0, 10.0, 1.0));

        budget.acquire(50.0).await;

        assert!(budget.peek() < 1.0);
    }

    #[test]
    fn sync_overwrites_and_clamps() {
        let budget = TokenBudget::new(config(100.0, 40.0, 0.000_001));

        budget.sync(75.0);
        assert!((budget.peek() - 75.0).abs() < 0.01);

        budget.sync(500.0);
        assert!((budget.peek() - 100.0).abs() < 0.01);

        budget.sync(-4.0);
        assert!(budget.peek() < 0.01);
    }

    #[test]
    fn health_reflects_thresholds() {
        let budget = TokenBudget::new(TokenBudgetConfig {
            warning_threshold: 50.0,
            critical_threshold: 10.0,
            ..config(100.0, 100.0, 0.000_001)
        });
        assert_eq!(budget.health(), BudgetHealth::Healthy);

        budget.sync(30.0);
        assert_eq!(budget.health(), BudgetHealth::Degraded);

        budget.sync(5.0);
        assert_eq!(budget.health(), BudgetHealth::Critical);
    }
}
