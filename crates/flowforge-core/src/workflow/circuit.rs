//! Circuit breakers for tasks using the `circuitBreaker` failure policy.
//!
//! One breaker per `(workflow, task)` pair, shared by every execution of that
//! workflow. A breaker counts consecutive runs that exhausted their retries;
//! once the threshold is reached it opens and the executor fails the task
//! without invoking the plugin until the cool-down has elapsed. The first
//! check after the cool-down admits a single trial run.
//!
//! Runs are admitted through [`CircuitBreakers::acquire`], which hands out a
//! [`CircuitPermit`]. A permit dropped without reporting an outcome (an
//! early return or a panic) reopens a half-open breaker.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant, cooldown: Duration },
    /// A trial run has been admitted and has not reported back yet.
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed {
            consecutive_failures: 0,
        }
    }
}

/// Key identifying one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitKey {
    pub workflow_id: Uuid,
    pub task: String,
}

impl CircuitKey {
    pub fn new(workflow_id: Uuid, task: impl Into<String>) -> Self {
        Self {
            workflow_id,
            task: task.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakers {
    states: DashMap<CircuitKey, CircuitState>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(())` if a run may proceed, otherwise the time left until a trial run
    /// is admitted (zero while a trial run is in flight).
    pub fn try_acquire(&self, key: &CircuitKey) -> Result<(), Duration> {
        let mut state = self.states.entry(key.clone()).or_default();
        match *state {
            CircuitState::Closed { .. } => Ok(()),
            CircuitState::Open {
                opened_at,
                cooldown,
            } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= cooldown {
                    *state = CircuitState::HalfOpen;
                    tracing::info!(task = %key.task, workflow_id = %key.workflow_id, "circuit half-open, admitting trial run");
                    Ok(())
                } else {
                    Err(cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => Err(Duration::ZERO),
        }
    }

    /// Like [`try_acquire`](Self::try_acquire), returning a permit that
    /// reports the run's outcome.
    pub fn acquire(
        self: &Arc<Self>,
        key: CircuitKey,
        threshold: u32,
        cooldown: Duration,
    ) -> Result<CircuitPermit, Duration> {
        self.try_acquire(&key)?;
        Ok(CircuitPermit {
            breakers: Arc::clone(self),
            key,
            threshold,
            cooldown,
            settled: false,
        })
    }

    pub fn record_success(&self, key: &CircuitKey) {
        if let Some(mut state) = self.states.get_mut(key) {
            if !matches!(*state, CircuitState::Closed { consecutive_failures: 0 }) {
                tracing::info!(task = %key.task, workflow_id = %key.workflow_id, "circuit closed");
            }
            *state = CircuitState::default();
        }
    }

    /// Record a run that failed after exhausting its attempts.
    pub fn record_failure(&self, key: &CircuitKey, threshold: u32, cooldown: Duration) {
        let mut state = self.states.entry(key.clone()).or_default();
        let next = match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= threshold.max(1) {
                    None
                } else {
                    Some(CircuitState::Closed {
                        consecutive_failures: failures,
                    })
                }
            }
            CircuitState::HalfOpen | CircuitState::Open { .. } => None,
        };

        *state = next.unwrap_or_else(|| {
            tracing::warn!(
                task = %key.task,
                workflow_id = %key.workflow_id,
                cooldown_ms = cooldown.as_millis() as u64,
                "circuit opened"
            );
            CircuitState::Open {
                opened_at: Instant::now(),
                cooldown,
            }
        });
    }

    /// A trial run ended without an outcome: back to `Open` for another cool-down.
    fn release_trial(&self, key: &CircuitKey, cooldown: Duration) {
        if let Some(mut state) = self.states.get_mut(key)
            && *state == CircuitState::HalfOpen
        {
            tracing::warn!(task = %key.task, workflow_id = %key.workflow_id, "circuit trial run abandoned, reopening");
            *state = CircuitState::Open {
                opened_at: Instant::now(),
                cooldown,
            };
        }
    }

    pub fn state(&self, key: &CircuitKey) -> CircuitState {
        self.states
            .get(key)
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// An admitted run of a breaker-guarded task.
#[must_use = "report the outcome with `success` or `failure`"]
pub struct CircuitPermit {
    breakers: Arc<CircuitBreakers>,
    key: CircuitKey,
    threshold: u32,
    cooldown: Duration,
    settled: bool,
}

impl CircuitPermit {
    pub fn success(mut self) {
        self.settled = true;
        self.breakers.record_success(&self.key);
    }

    /// The run failed after exhausting its attempts.
    pub fn failure(mut self) {
        self.settled = true;
        self.breakers
            .record_failure(&self.key, self.threshold, self.cooldown);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breakers.release_trial(&self.key, self.cooldown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(10);

    fn key() -> CircuitKey {
        CircuitKey::new(Uuid::nil(), "send")
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_admits_a_trial_after_cooldown() {
        let breakers = CircuitBreakers::new();
        let k = key();

        breakers.record_failure(&k, 2, COOLDOWN);
        assert!(breakers.try_acquire(&k).is_ok());
        breakers.record_failure(&k, 2, COOLDOWN);
        assert!(matches!(breakers.state(&k), CircuitState::Open { .. }));
        assert!(breakers.try_acquire(&k).is_err());

        tokio::time::advance(COOLDOWN).await;
        assert!(breakers.try_acquire(&k).is_ok());
        assert_eq!(breakers.state(&k), CircuitState::HalfOpen);
        // Only one trial run at a time.
        assert_eq!(breakers.try_acquire(&k), Err(Duration::ZERO));

        breakers.record_success(&k);
        assert_eq!(breakers.state(&k), CircuitState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_run_reopens() {
        let breakers = CircuitBreakers::new();
        let k = key();
        breakers.record_failure(&k, 1, COOLDOWN);
        tokio::time::advance(COOLDOWN).await;
        assert!(breakers.try_acquire(&k).is_ok());

        breakers.record_failure(&k, 1, COOLDOWN);
        assert!(matches!(breakers.state(&k), CircuitState::Open { .. }));
    }

    #[test]
    fn success_resets_failure_count() {
        let breakers = CircuitBreakers::new();
        let k = key();
        breakers.record_failure(&k, 3, COOLDOWN);
        breakers.record_failure(&k, 3, COOLDOWN);
        breakers.record_success(&k);
        breakers.record_failure(&k, 3, COOLDOWN);
        assert_eq!(
            breakers.state(&k),
            CircuitState::Closed {
                consecutive_failures: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreported_trial_run_reopens_the_breaker() {
        let breakers = Arc::new(CircuitBreakers::new());
        breakers.record_failure(&key(), 1, COOLDOWN);
        tokio::time::advance(COOLDOWN).await;

        let permit = breakers.acquire(key(), 1, COOLDOWN).unwrap();
        assert_eq!(breakers.state(&key()), CircuitState::HalfOpen);
        drop(permit);
        assert!(matches!(breakers.state(&key()), CircuitState::Open { .. }));

        tokio::time::advance(COOLDOWN).await;
        breakers.acquire(key(), 1, COOLDOWN).unwrap().success();
        assert_eq!(breakers.state(&key()), CircuitState::default());
    }

    #[test]
    fn unreported_run_on_a_closed_breaker_counts_nothing() {
        let breakers = Arc::new(CircuitBreakers::new());
        breakers.record_failure(&key(), 3, COOLDOWN);
        drop(breakers.acquire(key(), 3, COOLDOWN).unwrap());
        assert_eq!(
            breakers.state(&key()),
            CircuitState::Closed {
                consecutive_failures: 1
            }
        );
    }
}
