//! Transient failure retry policy and circuit breaker
//!
//! Sits below the classifier: connection failures, timeouts and 5xx/408
//! responses are retried here with a fixed delay schedule, everything else is
//! handed up untouched. A run of consecutive failed attempts opens the
//! breaker, after which requests fail fast until the cooldown elapses.
//!
//! Breaker states: Closed → Open → HalfOpen → (Closed | Open)

use reqwest::StatusCode;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::models::ErrorResult;
use crate::config::RetryConfig;

/// A failed attempt that is worth repeating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientFailure {
    Network(String),
    Timeout,
    ServerError { status: u16, body: String },
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientFailure::Network(e) => write!(f, "network error: {}", e),
            TransientFailure::Timeout => write!(f, "timeout"),
            TransientFailure::ServerError { status, .. } => write!(f, "server error HTTP {}", status),
        }
    }
}

/// Statuses handled by the retry layer instead of the classifier
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

/// Bounded retry with a per-failure delay schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub network_error_delay: Duration,
    pub server_error_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            network_error_delay: config.network_error_delay.as_duration(),
            server_error_delay: config.server_error_delay.as_duration(),
        }
    }

    /// Wait before the next attempt
    ///
    /// Server errors honour `nextRequestInSec` when the body carries it.
    pub fn delay_for(&self, failure: &TransientFailure) -> Duration {
        match failure {
            TransientFailure::Network(_) | TransientFailure::Timeout => self.network_error_delay,
            TransientFailure::ServerError { body, .. } => ErrorResult::parse(body)
                .and_then(|r| r.delay())
                .unwrap_or(self.server_error_delay),
        }
    }

    /// Whether another attempt is allowed after `retries` retries already made
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Half-open trial admitted and not yet settled
    trial_started: Option<Instant>,
}

/// Consecutive-failure circuit breaker shared by all requests of a client
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.breaker_threshold, config.breaker_cooldown.as_duration())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let state = self.lock();
        match state.opened_at {
            None => CircuitState::Closed,
            Some(opened) if opened.elapsed() < self.cooldown => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    /// `Err(remaining)` while open
    ///
    /// Once half-open, a single caller is admitted as the trial; everyone
    /// else is refused until the trial is recorded or released. A trial
    /// that is never settled stops blocking after another cooldown.
    pub fn check(&self) -> Result<(), Duration> {
        let mut state = self.lock();
        let Some(opened) = state.opened_at else {
            return Ok(());
        };

        let elapsed = opened.elapsed();
        if elapsed < self.cooldown {
            return Err(self.cooldown - elapsed);
        }

        match state.trial_started {
            Some(started) if started.elapsed() < self.cooldown => {
                Err(self.cooldown - started.elapsed())
            }
            _ => {
                tracing::debug!("Circuit breaker half-open, admitting trial request");
                state.trial_started = Some(Instant::now());
                Ok(())
            }
        }
    }

    /// Give up a half-open trial without an outcome (the attempt was cancelled)
    pub fn release_trial(&self) {
        self.lock().trial_started = None;
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.opened_at.is_some() {
            tracing::info!("Circuit breaker closed, server is responding again");
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_started = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.trial_started = None;

        // A failed half-open trial re-opens immediately since the count
        // is still at or above the threshold
        if state.consecutive_failures >= self.threshold {
            if state.opened_at.is_none() {
                tracing::warn!(
                    failures = state.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit breaker opened"
                );
            }
            state.opened_at = Some(Instant::now());
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}
