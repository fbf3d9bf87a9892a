//! Per-endpoint circuit breaker.
//!
//! ```text
//!   CLOSED ──(threshold failures within window)──▶ OPEN
//!     ▲                                              │ cooldown
//!     │ trial ok                                     ▼
//!     └──────────────── HALF_OPEN ◀──────────────────┘
//!                          │ trial failed
//!                          └──────────▶ OPEN
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    streak_started: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Fail-fast guard around one endpoint.
///
/// Thresholds are passed per call so a settings reload applies to the next
/// attempt.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    inner: Mutex<BreakerInner>,
}

/// Rejection from [`CircuitBreaker::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen {
    pub retry_after: Duration,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                streak_started: None,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current state. An open breaker whose cooldown has elapsed still reads
    /// `Open` until the next call takes the trial permit.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask permission for one network attempt.
    pub fn acquire(&self, settings: &BreakerSettings) -> Result<CallPermit<'_>, BreakerOpen> {
        let now = Instant::now();
        let cooldown = Duration::from_millis(settings.cooldown_ms);
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(endpoint = %self.endpoint, "circuit half-open, allowing trial call");
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(BreakerOpen {
                        retry_after: cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(BreakerOpen {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    /// Force the breaker closed and forget the failure streak.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.streak_started = None;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Outcomes of calls admitted before the circuit opened are ignored
    /// until it closes again; only the trial settles a half-open circuit.
    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        if !trial && inner.state != CircuitState::Closed {
            return;
        }
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(endpoint = %self.endpoint, "trial call succeeded, circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.consecutive_failures = 0;
        inner.streak_started = None;
    }

    fn on_failure(&self, trial: bool, settings: &BreakerSettings) {
        let now = Instant::now();
        let window = Duration::from_millis(settings.window_ms);
        let mut inner = self.lock();

        if trial {
            inner.trial_in_flight = false;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            tracing::warn!(endpoint = %self.endpoint, "trial call failed, circuit re-opened");
            return;
        }
        if inner.state != CircuitState::Closed {
            return;
        }

        let in_window = inner
            .streak_started
            .is_some_and(|started| now.saturating_duration_since(started) <= window);
        if in_window {
            inner.consecutive_failures += 1;
        } else {
            inner.consecutive_failures = 1;
            inner.streak_started = Some(now);
        }

        if inner.consecutive_failures >= settings.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            tracing::warn!(
                endpoint = %self.endpoint,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission for one attempt. Settle it with [`CallPermit::success`] or
/// [`CallPermit::failure`]; dropping it unsettled (e.g. the caller was
/// cancelled) records nothing and frees the half-open trial slot.
#[derive(Debug)]
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self, settings: &BreakerSettings) {
        self.settled = true;
        self.breaker.on_failure(self.trial, settings);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(threshold: u32) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: threshold,
            window_ms: 60_000,
            cooldown_ms: 1_000,
        }
    }

    fn fail(breaker: &CircuitBreaker, s: &BreakerSettings) {
        breaker.acquire(s).unwrap().failure(s);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let s = settings(3);
        let breaker = CircuitBreaker::new("db");
        fail(&breaker, &s);
        fail(&breaker, &s);
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker, &s);
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.acquire(&s).unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_streak() {
        let s = settings(2);
        let breaker = CircuitBreaker::new("db");
        fail(&breaker, &s);
        breaker.acquire(&s).unwrap().success();
        fail(&breaker, &s);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let s = BreakerSettings {
            failure_threshold: 2,
            window_ms: 100,
            cooldown_ms: 1_000,
        };
        let breaker = CircuitBreaker::new("db");
        fail(&breaker, &s);
        tokio::time::advance(Duration::from_millis(200)).await;
        fail(&breaker, &s);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_cooldown() {
        let s = settings(1);
        let breaker = CircuitBreaker::new("db");
        fail(&breaker, &s);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        let trial = breaker.acquire(&s).unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.acquire(&s).is_err());

        trial.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.acquire(&s).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcomes_do_not_settle_half_open() {
        let s = settings(1);
        let breaker = CircuitBreaker::new("db");
        let early_ok = breaker.acquire(&s).unwrap();
        let early_err = breaker.acquire(&s).unwrap();
        fail(&breaker, &s);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        let trial = breaker.acquire(&s).unwrap();
        assert!(trial.is_trial());

        early_ok.success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        early_err.failure(&s);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.acquire(&s).is_err());

        trial.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let s = settings(1);
        let breaker = CircuitBreaker::new("db");
        fail(&breaker, &s);
        tokio::time::advance(Duration::from_millis(1_000)).await;

        breaker.acquire(&s).unwrap().failure(&s);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.acquire(&s).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let s = settings(1);
        let breaker = CircuitBreaker::new("db");
        fail(&breaker, &s);
        tokio::time::advance(Duration::from_millis(1_000)).await;

        drop(breaker.acquire(&s).unwrap());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.acquire(&s).unwrap().is_trial());
    }
}
